//! Budget store commands: listing, saving and deleting budgets and their category allocations.

use crate::args::{Allocation, BudgetSetArgs};
use crate::commands::{plural, Out};
use crate::interval::{end_of_day, start_of_day};
use crate::model::{Budget, CategoryBudget};
use crate::{Config, Result};
use anyhow::bail;
use chrono::Utc;

pub async fn list_budgets(config: &Config) -> Result<Out<Vec<Budget>>> {
    let budgets = config.db().list_budgets().await?;
    Ok(Out::new(
        format!("Found {}", plural(budgets.len(), "budget", "budgets")),
        budgets,
    ))
}

/// Creates or updates a budget. The start and end days are taken in the configured time zone;
/// the budget runs from the first instant of `start` to the last second of `end`.
pub async fn set_budget(config: &Config, args: &BudgetSetArgs) -> Result<Out<Budget>> {
    let zone = config.time_zone();
    let start = start_of_day(zone, args.start()).with_timezone(&Utc);
    let end = end_of_day(zone, args.end()).with_timezone(&Utc);
    let budget = config
        .db()
        .upsert_budget(args.id(), start, end, args.reporting_interval())
        .await?;
    Ok(Out::new(format!("Saved budget {}", budget.id), budget))
}

pub async fn delete_budget(config: &Config, id: i64) -> Result<Out<()>> {
    if !config.db().delete_budget(id).await? {
        bail!("Budget {id} does not exist");
    }
    Ok(format!("Deleted budget {id}").into())
}

/// Replaces every category allocation of `budget_id` with `allocations`.
pub async fn allocate(
    config: &Config,
    budget_id: i64,
    allocations: &[Allocation],
) -> Result<Out<Vec<CategoryBudget>>> {
    let items: Vec<(i64, _)> = allocations
        .iter()
        .map(|a| (a.category_id, a.amount))
        .collect();
    let saved = config
        .db()
        .replace_category_budgets(budget_id, &items)
        .await?;
    Ok(Out::new(
        format!(
            "Budget {budget_id} now has {}",
            plural(saved.len(), "category budget", "category budgets")
        ),
        saved,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_set_budget_uses_configured_zone() {
        let env = TestEnv::new().await;
        let args = BudgetSetArgs::new(None, day(2024, 1, 1), day(2024, 12, 31), 0);
        let out = set_budget(&env.config(), &args).await.unwrap();
        let budget = out.structure().unwrap();
        assert_eq!(budget.start.to_rfc3339(), "2024-01-01T05:00:00+00:00");
        assert_eq!(budget.end.to_rfc3339(), "2025-01-01T04:59:59+00:00");

        let updated = BudgetSetArgs::new(Some(budget.id), day(2024, 1, 1), day(2024, 6, 30), 0);
        set_budget(&env.config(), &updated).await.unwrap();
        let listed = list_budgets(&env.config()).await.unwrap();
        assert_eq!(listed.message(), "Found 1 budget");
        assert_eq!(
            listed.structure().unwrap()[0].end.to_rfc3339(),
            "2024-07-01T03:59:59+00:00"
        );
    }

    #[tokio::test]
    async fn test_set_budget_rejects_reversed_days() {
        let env = TestEnv::new().await;
        let args = BudgetSetArgs::new(None, day(2024, 2, 1), day(2024, 1, 1), 0);
        let err = set_budget(&env.config(), &args).await.unwrap_err();
        assert!(err.to_string().contains("must start before it ends"));
    }

    #[tokio::test]
    async fn test_allocate_and_delete() {
        let env = TestEnv::new().await;
        let args = BudgetSetArgs::new(None, day(2024, 1, 1), day(2024, 12, 31), 0);
        let budget_id = set_budget(&env.config(), &args)
            .await
            .unwrap()
            .structure()
            .unwrap()
            .id;

        let allocations = [
            Allocation {
                category_id: 1,
                amount: dec!(-300),
            },
            Allocation {
                category_id: 2,
                amount: dec!(0),
            },
        ];
        let out = allocate(&env.config(), budget_id, &allocations)
            .await
            .unwrap();
        assert_eq!(out.message(), format!("Budget {budget_id} now has 1 category budget"));

        delete_budget(&env.config(), budget_id).await.unwrap();
        assert!(env.db().list_category_budgets().await.unwrap().is_empty());
        assert!(delete_budget(&env.config(), budget_id).await.is_err());
    }
}
