//! The `Dashboard` ties the cache, the budget store and the report aggregator together and owns
//! the two hooks that keep the cache honest: one runs after every transaction we write, the other
//! runs on a timer and catches changes made to the ledger by someone else.

use crate::api::{self, Mode, Upstream};
use crate::cache::{Cache, CacheOptions, Invalidation};
use crate::db::Db;
use crate::error::{CoreResult, Error};
use crate::model::{NewTransaction, TransactionGroup};
use crate::report::Reports;
use crate::{Config, Result};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Dashboard {
    cache: Cache,
    db: Db,
    reports: Reports,
}

impl Dashboard {
    pub fn new(upstream: Arc<dyn Upstream>, db: Db, zone: Tz, options: CacheOptions) -> Self {
        let cache = Cache::new(upstream, zone, options);
        let reports = Reports::new(cache.clone(), db.clone());
        Self { cache, db, reports }
    }

    /// Builds a `Dashboard` from a loaded configuration, talking to the upstream chosen by `mode`.
    pub async fn from_config(config: &Config, mode: Mode) -> Result<Self> {
        let upstream = api::upstream(config, mode).await?;
        Ok(Self::new(
            upstream,
            config.db().clone(),
            config.time_zone(),
            config.cache_options(),
        )
        .with_tax_category(config.tax_category()))
    }

    /// Names the ledger category whose total the big picture reports as taxes.
    pub fn with_tax_category(mut self, name: &str) -> Self {
        self.reports = self.reports.with_tax_category(name);
        self
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn reports(&self) -> &Reports {
        &self.reports
    }

    /// Schedules background fills for the budgets that are in effect now. Returns the number of
    /// fetches scheduled.
    pub async fn start(&self) -> CoreResult<usize> {
        self.start_at(Utc::now()).await
    }

    pub(crate) async fn start_at(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let budgets = self.db.list_budgets().await?;
        let category_budgets = self.db.list_category_budgets().await?;
        let scheduled = self.cache.warm(&budgets, &category_budgets, now);
        info!("Warming the cache with {scheduled} fetches");
        Ok(scheduled)
    }

    /// Call after a transaction in `category_id` dated `date` was written to the ledger. Drops the
    /// category totals that could include it, the income and expense totals, the account balances
    /// and the transaction listings.
    pub fn on_transaction_created<D: Datelike>(&self, category_id: i64, date: &D) {
        let dropped = self
            .cache
            .invalidate(Invalidation::transaction(category_id, date));
        self.cache.invalidate_insights();
        self.cache.invalidate_accounts();
        self.cache.invalidate_transactions();
        debug!(
            "New transaction in category {category_id} for {}, dropped {dropped} totals",
            date.year()
        );
    }

    /// Checks the ledger for changes made elsewhere and re-warms the cache if there were any.
    /// Returns whether anything changed.
    pub async fn on_tick(&self) -> CoreResult<bool> {
        self.on_tick_at(Utc::now()).await
    }

    pub(crate) async fn on_tick_at(&self, now: DateTime<Utc>) -> CoreResult<bool> {
        let budgets = self.db.list_budgets().await?;
        let category_budgets = self.db.list_category_budgets().await?;
        self.cache.reconcile(&budgets, &category_budgets, now).await
    }

    /// Validates `transaction`, records it in the ledger and runs the write hook.
    pub async fn create_transaction(
        &self,
        transaction: NewTransaction,
    ) -> CoreResult<TransactionGroup> {
        transaction.validate().map_err(Error::InvalidRequest)?;

        let categories = self.cache.categories().await?;
        if !categories.iter().any(|c| c.id == transaction.category_id) {
            return Err(Error::InvalidRequest(format!(
                "unknown category {}",
                transaction.category_id
            )));
        }

        let accounts = self.cache.accounts().await?;
        let transaction_type = transaction.transaction_type(&accounts).ok_or_else(|| {
            Error::InvalidRequest(
                "the source and destination accounts do not make a withdrawal, deposit or transfer"
                    .into(),
            )
        })?;

        let category_id = transaction.category_id;
        let date = transaction.date.with_timezone(&self.cache.zone());
        let created = self
            .cache
            .upstream()
            .create_transaction(transaction, transaction_type)
            .await?;
        info!("Created {transaction_type} {}", created.id);
        self.on_transaction_created(category_id, &date);
        Ok(created)
    }

    /// Runs `on_tick` every `interval` until the task is dropped. Errors are logged.
    pub async fn run_reconciler(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately and the cache was just warmed.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.on_tick().await {
                Ok(true) => info!("The ledger changed, the cache was rebuilt"),
                Ok(false) => {}
                Err(e) => warn!("Unable to reconcile with the ledger: {e}"),
            }
        }
    }
}
