//! This module is responsible for reading, writing and managing the SQLite database that holds
//! budgets and category budgets. Nothing in here is ever sent to the ledger.

mod migrations;

use crate::model::{Budget, CategoryBudget};
use crate::Result;
use anyhow::{bail, ensure, Context};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

type BudgetRow = (i64, String, String, i64);
type CategoryBudgetRow = (i64, i64, i64, String);

pub(crate) const BUDGET_COLUMNS: &str = "id, start_at, end_at, reporting_interval";
pub(crate) const CATEGORY_BUDGET_COLUMNS: &str = "id, budget_id, category_id, amount";

#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// - Validates that no file currently exists at `path`
    /// - Creates a new SQLite file at `path`
    /// - Initializes the schema
    pub(crate) async fn init(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            bail!("A database already exists at {}", path.display());
        }
        let pool = connect(path, true).await?;
        migrations::create_version_table(&pool).await?;
        migrations::migrate(&pool, migrations::CURRENT_VERSION).await?;
        Ok(Self { pool })
    }

    /// - Validates that there is a SQLite file at `path`
    /// - Updates the schema with migrations if it is out-of-date
    pub(crate) async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            bail!("The database file is missing '{}'", path.display());
        }
        let pool = connect(path, false).await?;
        let from = migrations::migrate(&pool, migrations::CURRENT_VERSION).await?;
        if from != migrations::CURRENT_VERSION {
            debug!(
                "Upgraded the budget store from schema version {from} to {}",
                migrations::CURRENT_VERSION
            );
        }
        Ok(Self { pool })
    }

    /// All budgets, earliest first.
    pub async fn list_budgets(&self) -> Result<Vec<Budget>> {
        let rows: Vec<BudgetRow> = sqlx::query_as(&format!(
            "SELECT {BUDGET_COLUMNS} FROM budgets ORDER BY start_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list budgets")?;
        rows.into_iter().map(budget_from_row).collect()
    }

    pub async fn get_budget(&self, id: i64) -> Result<Option<Budget>> {
        let row: Option<BudgetRow> = sqlx::query_as(&format!(
            "SELECT {BUDGET_COLUMNS} FROM budgets WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read budget {id}"))?;
        row.map(budget_from_row).transpose()
    }

    /// The first budget, by start, whose span strictly contains `now`.
    pub async fn current_budget(&self, now: DateTime<Utc>) -> Result<Option<Budget>> {
        Ok(self
            .list_budgets()
            .await?
            .into_iter()
            .find(|b| b.covers(now)))
    }

    /// Creates a budget, or replaces the budget with `id` when one is given.
    pub async fn upsert_budget(
        &self,
        id: Option<i64>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reporting_interval: i64,
    ) -> Result<Budget> {
        ensure!(
            start < end,
            "A budget must start before it ends ({} is not before {})",
            timestamp(start),
            timestamp(end)
        );
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        let updated = match id {
            Some(id) => sqlx::query(
                "UPDATE budgets SET start_at = ?, end_at = ?, reporting_interval = ? WHERE id = ?",
            )
            .bind(timestamp(start))
            .bind(timestamp(end))
            .bind(reporting_interval)
            .bind(id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to update budget {id}"))?
            .rows_affected(),
            None => 0,
        };
        let id = if updated == 1 {
            id.unwrap_or_default()
        } else {
            sqlx::query(
                "INSERT INTO budgets (id, start_at, end_at, reporting_interval)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(timestamp(start))
            .bind(timestamp(end))
            .bind(reporting_interval)
            .execute(&mut *tx)
            .await
            .context("Failed to insert budget")?
            .last_insert_rowid()
        };
        tx.commit().await.context("Failed to commit budget")?;
        debug!("Saved budget {id}");
        self.get_budget(id)
            .await?
            .with_context(|| format!("Budget {id} vanished after it was saved"))
    }

    /// Deletes a budget and its category budgets. Returns false if there was no such budget.
    pub async fn delete_budget(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM budgets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete budget {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_category_budgets(&self) -> Result<Vec<CategoryBudget>> {
        let rows: Vec<CategoryBudgetRow> = sqlx::query_as(&format!(
            "SELECT {CATEGORY_BUDGET_COLUMNS} FROM category_budgets ORDER BY budget_id, id"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list category budgets")?;
        rows.into_iter().map(category_budget_from_row).collect()
    }

    pub async fn list_category_budgets_for(&self, budget_id: i64) -> Result<Vec<CategoryBudget>> {
        let rows: Vec<CategoryBudgetRow> = sqlx::query_as(&format!(
            "SELECT {CATEGORY_BUDGET_COLUMNS} FROM category_budgets WHERE budget_id = ? ORDER BY id"
        ))
        .bind(budget_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list category budgets of budget {budget_id}"))?;
        rows.into_iter().map(category_budget_from_row).collect()
    }

    pub async fn get_category_budget(&self, id: i64) -> Result<Option<CategoryBudget>> {
        let row: Option<CategoryBudgetRow> = sqlx::query_as(&format!(
            "SELECT {CATEGORY_BUDGET_COLUMNS} FROM category_budgets WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read category budget {id}"))?;
        row.map(category_budget_from_row).transpose()
    }

    /// Replaces all category budgets of `budget_id` with `allocations` in one transaction.
    /// Allocations of zero are left out. The same category may not appear twice.
    pub async fn replace_category_budgets(
        &self,
        budget_id: i64,
        allocations: &[(i64, Decimal)],
    ) -> Result<Vec<CategoryBudget>> {
        let mut seen = HashSet::new();
        for (category_id, _) in allocations {
            ensure!(
                seen.insert(*category_id),
                "Category {category_id} is allocated more than once"
            );
        }
        if self.get_budget(budget_id).await?.is_none() {
            bail!("Budget {budget_id} does not exist");
        }

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query("DELETE FROM category_budgets WHERE budget_id = ?")
            .bind(budget_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear category budgets")?;
        for (category_id, amount) in allocations.iter().filter(|(_, a)| !a.is_zero()) {
            sqlx::query(
                "INSERT INTO category_budgets (budget_id, category_id, amount) VALUES (?, ?, ?)",
            )
            .bind(budget_id)
            .bind(category_id)
            .bind(amount.to_string())
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to allocate category {category_id}"))?;
        }
        tx.commit()
            .await
            .context("Failed to commit category budgets")?;
        self.list_category_budgets_for(budget_id).await
    }

    pub async fn delete_category_budget(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM category_budgets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete category budget {id}"))?;
        Ok(result.rows_affected() > 0)
    }
}

pub(crate) async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .context("Failed to parse SQLite connection string")?
        .create_if_missing(create)
        .foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open SQLite database at {}", path.display()))
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp '{s}' in database"))?
        .with_timezone(&Utc))
}

fn budget_from_row((id, start, end, reporting_interval): BudgetRow) -> Result<Budget> {
    Ok(Budget {
        id,
        start: parse_timestamp(&start)?,
        end: parse_timestamp(&end)?,
        reporting_interval,
    })
}

fn category_budget_from_row(
    (id, budget_id, category_id, amount): CategoryBudgetRow,
) -> Result<CategoryBudget> {
    Ok(CategoryBudget {
        id,
        budget_id,
        category_id,
        amount: Decimal::from_str(&amount)
            .with_context(|| format!("Bad amount '{amount}' in category budget {id}"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    async fn db() -> (TempDir, Db) {
        let dir = TempDir::new().unwrap();
        let db = Db::init(dir.path().join("budgetboard.sqlite")).await.unwrap();
        (dir, db)
    }

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_init_refuses_existing_file_and_load_reopens() {
        let (dir, db) = db().await;
        db.upsert_budget(None, utc(2024, 1, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap();
        let path = dir.path().join("budgetboard.sqlite");
        assert!(Db::init(&path).await.is_err());
        let reopened = Db::load(&path).await.unwrap();
        assert_eq!(reopened.list_budgets().await.unwrap().len(), 1);
        assert!(Db::load(dir.path().join("missing.sqlite")).await.is_err());
    }

    #[tokio::test]
    async fn test_upsert_budget() {
        let (_dir, db) = db().await;
        let created = db
            .upsert_budget(None, utc(2024, 1, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap();
        assert_eq!(created.start, utc(2024, 1, 1));

        let updated = db
            .upsert_budget(Some(created.id), utc(2024, 2, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.start, utc(2024, 2, 1));

        let explicit = db
            .upsert_budget(Some(42), utc(2026, 1, 1), utc(2027, 1, 1), 1)
            .await
            .unwrap();
        assert_eq!(explicit.id, 42);
        assert_eq!(explicit.reporting_interval, 1);
        assert_eq!(db.list_budgets().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_budget_must_start_before_it_ends() {
        let (_dir, db) = db().await;
        let err = db
            .upsert_budget(None, utc(2025, 1, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("must start before it ends"));
    }

    #[tokio::test]
    async fn test_current_budget() {
        let (_dir, db) = db().await;
        db.upsert_budget(None, utc(2023, 1, 1), utc(2024, 1, 1), 0)
            .await
            .unwrap();
        let b = db
            .upsert_budget(None, utc(2024, 1, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap();
        let now = Utc.with_ymd_and_hms(2024, 7, 4, 12, 0, 0).unwrap();
        assert_eq!(db.current_budget(now).await.unwrap(), Some(b));
        assert_eq!(db.current_budget(utc(2030, 1, 1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_replace_category_budgets() {
        let (_dir, db) = db().await;
        let budget = db
            .upsert_budget(None, utc(2024, 1, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap();
        let first = db
            .replace_category_budgets(budget.id, &[(1, dec!(-400)), (2, dec!(-1500))])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);

        let second = db
            .replace_category_budgets(budget.id, &[(1, dec!(-450.50)), (3, Decimal::ZERO)])
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].category_id, 1);
        assert_eq!(second[0].amount, dec!(-450.50));
        assert_eq!(
            db.get_category_budget(second[0].id).await.unwrap(),
            Some(second[0].clone())
        );
    }

    #[tokio::test]
    async fn test_duplicate_allocation_is_rejected_and_nothing_changes() {
        let (_dir, db) = db().await;
        let budget = db
            .upsert_budget(None, utc(2024, 1, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap();
        db.replace_category_budgets(budget.id, &[(1, dec!(-400))])
            .await
            .unwrap();
        let err = db
            .replace_category_budgets(budget.id, &[(2, dec!(-1)), (2, dec!(-2))])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("more than once"));
        let kept = db.list_category_budgets_for(budget.id).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].category_id, 1);
    }

    #[tokio::test]
    async fn test_allocating_to_missing_budget_fails() {
        let (_dir, db) = db().await;
        assert!(db
            .replace_category_budgets(9, &[(1, dec!(-1))])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_budget_cascades() {
        let (_dir, db) = db().await;
        let budget = db
            .upsert_budget(None, utc(2024, 1, 1), utc(2025, 1, 1), 0)
            .await
            .unwrap();
        let allocated = db
            .replace_category_budgets(budget.id, &[(1, dec!(-400))])
            .await
            .unwrap();
        assert!(db.delete_budget(budget.id).await.unwrap());
        assert!(!db.delete_budget(budget.id).await.unwrap());
        assert!(db.list_category_budgets().await.unwrap().is_empty());
        assert!(!db.delete_category_budget(allocated[0].id).await.unwrap());
    }
}
