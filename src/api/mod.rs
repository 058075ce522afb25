//! The `Upstream` trait and its implementations.
//!
//! `Upstream` is the ledger as the rest of the program sees it: a handful of slow, fallible
//! queries. `FireflyClient` talks to a Firefly-III server over HTTP. `TestUpstream` keeps
//! everything in memory so that the whole program, and its tests, can run without a server.

mod firefly;
mod test_client;

use crate::cache::TransactionsKey;
use crate::error::CoreResult;
use crate::model::{
    Account, Category, CategoryTotal, InsightKind, NewTransaction, TransactionGroup,
    TransactionType,
};
use crate::{Config, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

pub use firefly::FireflyClient;
pub use test_client::{Calls, TestUpstream};

/// Environment variable that, when set and non-empty, puts the program in `Mode::Testing`.
pub const TEST_MODE_ENV: &str = "BUDGETBOARD_IN_TEST_MODE";

/// The capabilities of the upstream ledger. Every call may block for several seconds and every
/// call may fail.
#[async_trait::async_trait]
pub trait Upstream: Send + Sync {
    /// All active accounts.
    async fn fetch_accounts(&self) -> CoreResult<Vec<Account>>;

    /// All categories.
    async fn fetch_categories(&self) -> CoreResult<Vec<Category>>;

    /// One row per category that had activity between `start` and `end`. Zero rows is valid.
    async fn fetch_category_totals(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CategoryTotal>>;

    /// The total for one category between `start` and `end`. A well-behaved ledger returns exactly
    /// one row; callers validate that.
    async fn fetch_category_total(
        &self,
        category_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CategoryTotal>>;

    /// The ledger's total income or expenses between `start` and `end`, across all categories.
    async fn fetch_insight_total(
        &self,
        kind: InsightKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Decimal>;

    /// One page of transactions, optionally restricted to a date range.
    async fn fetch_transactions(&self, key: &TransactionsKey) -> CoreResult<Vec<TransactionGroup>>;

    /// Records a new transaction in the ledger and returns it as stored.
    async fn create_transaction(
        &self,
        transaction: NewTransaction,
        transaction_type: TransactionType,
    ) -> CoreResult<TransactionGroup>;
}

/// Whether we talk to a real ledger or to the in-memory one.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub enum Mode {
    #[default]
    Firefly,
    Testing,
}

impl Mode {
    /// `Mode::Testing` if `BUDGETBOARD_IN_TEST_MODE` is set and non-empty, otherwise
    /// `Mode::Firefly`.
    pub fn from_env() -> Self {
        match std::env::var(TEST_MODE_ENV) {
            Ok(value) if !value.is_empty() => Mode::Testing,
            _ => Mode::Firefly,
        }
    }
}

/// Constructs the `Upstream` for `mode`.
pub async fn upstream(config: &Config, mode: Mode) -> Result<Arc<dyn Upstream>> {
    Ok(match mode {
        Mode::Firefly => Arc::new(FireflyClient::from_config(config).await?),
        Mode::Testing => Arc::new(TestUpstream::default()),
    })
}
