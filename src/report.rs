//! Budget reports: planned amounts joined with the actual totals from the ledger.

use crate::cache::{Cache, ALL_CATEGORIES};
use crate::db::Db;
use crate::error::{CoreResult, Error};
use crate::interval::{end_of_day, intervals_at, start_of_day};
use crate::model::{Category, CategoryTotal, InsightKind};
use chrono::{DateTime, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The planned and actual amounts of one category budget over its budget's whole span.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct CategorySummary {
    pub category_id: i64,
    /// Empty when the category no longer exists in the ledger.
    pub name: String,
    pub category_budget_id: i64,
    /// The planned amount.
    #[schemars(with = "String")]
    pub amount: Decimal,
    /// The actual net amount, `earned + spent`.
    #[schemars(with = "String")]
    pub sum: Decimal,
    #[schemars(with = "String")]
    pub start: DateTime<Utc>,
    #[schemars(with = "String")]
    pub end: DateTime<Utc>,
}

/// A `CategorySummary` with the month-by-month totals that make up its `sum`.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CategorySummaryDetail {
    #[serde(flatten)]
    pub summary: CategorySummary,
    pub totals: Vec<CategoryTotal>,
}

/// The category whose total the big picture reports as taxes, matched without regard to case.
pub const DEFAULT_TAX_CATEGORY: &str = "taxes";

/// Income, expenses and taxes over the last three and twelve months, with net worth. Expenses and
/// taxes paid are negative.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct BigPicture {
    #[schemars(with = "String")]
    pub income_three_months: Decimal,
    #[schemars(with = "String")]
    pub expenses_three_months: Decimal,
    #[schemars(with = "String")]
    pub income_twelve_months: Decimal,
    #[schemars(with = "String")]
    pub expenses_twelve_months: Decimal,
    /// The net total of the tax category over the last twelve months.
    #[schemars(with = "String")]
    pub taxes_twelve_months: Decimal,
    #[schemars(with = "String")]
    pub net_worth: Decimal,
}

/// Builds reports from the budget store and the cache.
#[derive(Debug, Clone)]
pub struct Reports {
    cache: Cache,
    db: Db,
    tax_category: String,
}

impl Reports {
    pub fn new(cache: Cache, db: Db) -> Self {
        Self {
            cache,
            db,
            tax_category: DEFAULT_TAX_CATEGORY.to_string(),
        }
    }

    pub fn with_tax_category(mut self, name: &str) -> Self {
        self.tax_category = name.to_string();
        self
    }

    /// One summary per category budget of `budget_id`, with the actual amount taken from the
    /// all-categories totals over the whole budget span. Categories without activity sum to zero.
    pub async fn list_category_summaries(
        &self,
        budget_id: i64,
    ) -> CoreResult<Vec<CategorySummary>> {
        let budget = self
            .db
            .get_budget(budget_id)
            .await?
            .ok_or_else(|| Error::not_found("budget", budget_id))?;
        let allocations = self.db.list_category_budgets_for(budget_id).await?;
        let totals = self
            .cache
            .category_totals(ALL_CATEGORIES, budget.start, budget.end)
            .await?;

        let mut categories: Option<Vec<Category>> = None;
        let mut summaries = Vec::with_capacity(allocations.len());
        for allocation in allocations {
            let total = totals
                .iter()
                .find(|t| t.category.id == allocation.category_id);
            let name = match total {
                Some(total) => total.category.name.clone(),
                None => {
                    if categories.is_none() {
                        categories = Some(self.cache.categories().await?);
                    }
                    categories
                        .iter()
                        .flatten()
                        .find(|c| c.id == allocation.category_id)
                        .map(|c| c.name.clone())
                        .unwrap_or_default()
                }
            };
            summaries.push(CategorySummary {
                category_id: allocation.category_id,
                name,
                category_budget_id: allocation.id,
                amount: allocation.amount,
                sum: total.map(CategoryTotal::net).unwrap_or_default(),
                start: budget.start,
                end: budget.end,
            });
        }
        Ok(summaries)
    }

    /// The month-by-month breakdown of one category budget, up to the current month.
    pub async fn fetch_category_summary(
        &self,
        category_budget_id: i64,
    ) -> CoreResult<CategorySummaryDetail> {
        self.fetch_category_summary_at(category_budget_id, Utc::now())
            .await
    }

    /// Like [`Reports::fetch_category_summary`] with the current time supplied by the caller.
    pub async fn fetch_category_summary_at(
        &self,
        category_budget_id: i64,
        now: DateTime<Utc>,
    ) -> CoreResult<CategorySummaryDetail> {
        let allocation = self
            .db
            .get_category_budget(category_budget_id)
            .await?
            .ok_or_else(|| Error::not_found("category budget", category_budget_id))?;
        let budget = self
            .db
            .get_budget(allocation.budget_id)
            .await?
            .ok_or_else(|| Error::not_found("budget", allocation.budget_id))?;
        let category = self
            .cache
            .categories()
            .await?
            .into_iter()
            .find(|c| c.id == allocation.category_id)
            .ok_or_else(|| Error::not_found("category", allocation.category_id))?;
        if !budget.is_monthly() {
            return Err(Error::UnsupportedReportingInterval(
                budget.reporting_interval,
            ));
        }

        let intervals = intervals_at(budget.start, budget.end, self.cache.zone(), now);
        debug!(
            "Category budget {category_budget_id} spans {} month(s)",
            intervals.len()
        );
        let mut totals = Vec::with_capacity(intervals.len());
        let mut sum = Decimal::ZERO;
        for interval in intervals {
            let rows = self
                .cache
                .category_totals(category.id, interval.start_utc(), interval.end_utc())
                .await?;
            // The cache only stores single-category entries with exactly one row.
            for total in rows {
                sum += total.net();
                totals.push(total);
            }
        }

        Ok(CategorySummaryDetail {
            summary: CategorySummary {
                category_id: category.id,
                name: category.name,
                category_budget_id,
                amount: allocation.amount,
                sum,
                start: budget.start,
                end: budget.end,
            },
            totals,
        })
    }

    /// The id of the first budget whose span strictly contains `now`.
    pub async fn current_budget_id(&self, now: DateTime<Utc>) -> CoreResult<Option<i64>> {
        Ok(self.db.current_budget(now).await?.map(|b| b.id))
    }

    /// The total balance of the asset accounts that count towards net worth.
    pub async fn net_worth(&self) -> CoreResult<Decimal> {
        Ok(self
            .cache
            .accounts()
            .await?
            .iter()
            .filter(|a| a.is_asset() && a.include_in_net_worth)
            .map(|a| a.current_balance)
            .sum())
    }

    pub async fn big_picture(&self) -> CoreResult<BigPicture> {
        self.big_picture_at(Utc::now()).await
    }

    /// The big picture for the whole days, in the cache's zone, that end with the day of `now`.
    /// Keys only change once a day, so repeated reads are served from the cache.
    pub async fn big_picture_at(&self, now: DateTime<Utc>) -> CoreResult<BigPicture> {
        let zone = self.cache.zone();
        let today = now.with_timezone(&zone).date_naive();
        let end = end_of_day(zone, today).with_timezone(&Utc);
        let since = |months: u32| {
            let day = today
                .checked_sub_months(Months::new(months))
                .unwrap_or(NaiveDate::MIN);
            start_of_day(zone, day).with_timezone(&Utc)
        };
        let (three, twelve) = (since(3), since(12));

        let cache = &self.cache;
        let (income_three_months, expenses_three_months, income_twelve_months) = tokio::try_join!(
            cache.insight_total(InsightKind::Income, three, end),
            cache.insight_total(InsightKind::Expense, three, end),
            cache.insight_total(InsightKind::Income, twelve, end),
        )?;
        let (expenses_twelve_months, taxes_twelve_months, net_worth) = tokio::try_join!(
            cache.insight_total(InsightKind::Expense, twelve, end),
            self.category_net(&self.tax_category, twelve, end),
            self.net_worth(),
        )?;
        Ok(BigPicture {
            income_three_months,
            expenses_three_months,
            income_twelve_months,
            expenses_twelve_months,
            taxes_twelve_months,
            net_worth,
        })
    }

    /// The net total of the category called `name`, through the single-category cache entry.
    async fn category_net(
        &self,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Decimal> {
        let category = self
            .cache
            .categories()
            .await?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::MissingCategory(name.to_string()))?;
        let rows = self.cache.category_totals(category.id, start, end).await?;
        Ok(rows.iter().map(CategoryTotal::net).sum())
    }
}
