use crate::commands::{plural, Out};
use crate::report::{BigPicture, CategorySummary, CategorySummaryDetail};
use crate::{Dashboard, Result};
use anyhow::Context;
use chrono::Utc;
use rust_decimal::Decimal;

/// Planned and actual amounts for each category budget of `budget_id`, or of the budget in effect
/// now when no id is given.
pub async fn summary(
    dashboard: &Dashboard,
    budget_id: Option<i64>,
) -> Result<Out<Vec<CategorySummary>>> {
    let budget_id = match budget_id {
        Some(id) => id,
        None => dashboard
            .reports()
            .current_budget_id(Utc::now())
            .await?
            .context("No budget covers today, pass a budget id")?,
    };
    let summaries = dashboard
        .reports()
        .list_category_summaries(budget_id)
        .await?;
    Ok(Out::new(
        format!(
            "Budget {budget_id} has {}",
            plural(summaries.len(), "category budget", "category budgets")
        ),
        summaries,
    ))
}

/// The month-by-month totals of one category budget.
pub async fn detail(
    dashboard: &Dashboard,
    category_budget_id: i64,
) -> Result<Out<CategorySummaryDetail>> {
    let detail = dashboard
        .reports()
        .fetch_category_summary(category_budget_id)
        .await?;
    Ok(Out::new(
        format!(
            "{} over {}: planned {}, actual {}",
            detail.summary.name,
            plural(detail.totals.len(), "month", "months"),
            detail.summary.amount,
            detail.summary.sum
        ),
        detail,
    ))
}

pub async fn net_worth(dashboard: &Dashboard) -> Result<Out<Decimal>> {
    let total = dashboard.reports().net_worth().await?;
    Ok(Out::new(format!("Net worth is {total}"), total))
}

/// Income, expenses and taxes over the last three and twelve months, with net worth.
pub async fn big_picture(dashboard: &Dashboard) -> Result<Out<BigPicture>> {
    let big_picture = dashboard.reports().big_picture().await?;
    Ok(Out::new(
        format!(
            "Last 12 months: income {}, expenses {}, taxes {}. Net worth is {}",
            big_picture.income_twelve_months,
            big_picture.expenses_twelve_months,
            big_picture.taxes_twelve_months,
            big_picture.net_worth
        ),
        big_picture,
    ))
}
