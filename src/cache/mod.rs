//! The refreshing cache that sits between the reports and the upstream ledger.
//!
//! The cache keeps five tables: accounts, categories, category totals by `CategoryTotalsKey`,
//! income and expense totals by `InsightKey` and transaction pages by `TransactionsKey`. Each entry
//! is filled on first read, or ahead of time by `warm`, and stays until it is invalidated. The
//! tables sit behind one mutex which is never held across an upstream call.
//!
//! A miss registers a pending slot for its key before calling upstream. Readers that arrive while
//! the slot is pending wait for the same result instead of issuing their own call. The leader only
//! stores its result if its slot is still registered when the call returns; an invalidation in the
//! meantime wins. Failed calls are never stored.

mod key;
mod refresh;

pub use key::{CategoryTotalsKey, InsightKey, Invalidation, TransactionsKey, ALL_CATEGORIES};
pub use refresh::RefreshStats;

use crate::api::Upstream;
use crate::error::{CoreResult, Error};
use crate::interval::intervals_at;
use crate::model::{
    Account, Budget, Category, CategoryBudget, CategoryTotal, InsightKind, TransactionGroup,
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use refresh::RefreshQueue;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, trace};

pub const DEFAULT_QUEUE_DEPTH: usize = 256;
pub const DEFAULT_WORKERS: usize = 4;

/// Sizing for the background refresh queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct CacheOptions {
    pub queue_depth: usize,
    pub workers: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            workers: DEFAULT_WORKERS,
        }
    }
}

type Published<V> = Option<CoreResult<V>>;

enum Slot<V> {
    Present(V),
    Pending {
        flight: u64,
        rx: watch::Receiver<Published<V>>,
    },
}

struct Table<K, V> {
    slots: HashMap<K, Slot<V>>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> Table<K, V> {
    fn present(&self, key: &K) -> Option<&V> {
        match self.slots.get(key) {
            Some(Slot::Present(value)) => Some(value),
            _ => None,
        }
    }

    fn is_flight(&self, key: &K, flight: u64) -> bool {
        matches!(self.slots.get(key), Some(Slot::Pending { flight: f, .. }) if *f == flight)
    }

    /// Stores `value` unless a fetch for `key` is in progress; that fetch will store its own.
    fn put(&mut self, key: K, value: V) {
        if !matches!(self.slots.get(&key), Some(Slot::Pending { .. })) {
            self.slots.insert(key, Slot::Present(value));
        }
    }
}

#[derive(Default)]
struct Tables {
    accounts: Table<(), Vec<Account>>,
    categories: Table<(), Vec<Category>>,
    category_totals: Table<CategoryTotalsKey, Vec<CategoryTotal>>,
    insights: Table<InsightKey, Decimal>,
    transactions: Table<TransactionsKey, Vec<TransactionGroup>>,
}

type Select<K, V> = fn(&mut Tables) -> &mut Table<K, V>;

fn accounts_table(t: &mut Tables) -> &mut Table<(), Vec<Account>> {
    &mut t.accounts
}

fn categories_table(t: &mut Tables) -> &mut Table<(), Vec<Category>> {
    &mut t.categories
}

fn category_totals_table(t: &mut Tables) -> &mut Table<CategoryTotalsKey, Vec<CategoryTotal>> {
    &mut t.category_totals
}

fn insights_table(t: &mut Tables) -> &mut Table<InsightKey, Decimal> {
    &mut t.insights
}

fn transactions_table(t: &mut Tables) -> &mut Table<TransactionsKey, Vec<TransactionGroup>> {
    &mut t.transactions
}

fn lock(tables: &Mutex<Tables>) -> MutexGuard<'_, Tables> {
    // The tables are plain maps; a panic elsewhere cannot leave them half-updated.
    tables.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    upstream: Arc<dyn Upstream>,
    zone: Tz,
    tables: Mutex<Tables>,
    flights: AtomicU64,
    refresh: RefreshQueue,
}

/// A handle to the cache. Clones share the same tables.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<Inner>,
}

impl Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("zone", &self.inner.zone)
            .field("refresh", &self.refresh_stats())
            .finish()
    }
}

enum Step<V> {
    Wait(watch::Receiver<Published<V>>),
    Lead(watch::Sender<Published<V>>, u64),
}

/// Removes a pending slot if its leader goes away before publishing, so that waiters retry
/// instead of waiting forever.
struct FlightGuard<'a, K: Eq + Hash, V> {
    tables: &'a Mutex<Tables>,
    select: Select<K, V>,
    key: K,
    flight: u64,
    armed: bool,
}

impl<K: Eq + Hash, V> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut tables = lock(self.tables);
        let table = (self.select)(&mut tables);
        if table.is_flight(&self.key, self.flight) {
            table.slots.remove(&self.key);
        }
    }
}

impl Cache {
    /// Creates an empty cache and starts its refresh workers. Must be called from within a tokio
    /// runtime.
    pub fn new(upstream: Arc<dyn Upstream>, zone: Tz, options: CacheOptions) -> Self {
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<Inner>| {
            let weak = weak.clone();
            let refresh = RefreshQueue::start(options.queue_depth, options.workers, move |key| {
                let cache = Cache {
                    inner: weak.upgrade()?,
                };
                Some(async move { cache.category_totals_for(key).await.map(|_| ()) })
            });
            Inner {
                upstream,
                zone,
                tables: Mutex::new(Tables::default()),
                flights: AtomicU64::new(1),
                refresh,
            }
        });
        Self { inner }
    }

    pub fn zone(&self) -> Tz {
        self.inner.zone
    }

    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.inner.upstream
    }

    /// Active accounts.
    pub async fn accounts(&self) -> CoreResult<Vec<Account>> {
        let upstream = &self.inner.upstream;
        self.get_or_fill(accounts_table, (), || upstream.fetch_accounts())
            .await
    }

    pub async fn categories(&self) -> CoreResult<Vec<Category>> {
        let upstream = &self.inner.upstream;
        self.get_or_fill(categories_table, (), || upstream.fetch_categories())
            .await
    }

    /// Category totals between `start` and `end`. With `ALL_CATEGORIES` this is one row per
    /// category with activity, possibly none. With a category id it is exactly one row, and any
    /// other upstream answer is an `UpstreamShapeMismatch`.
    pub async fn category_totals(
        &self,
        category_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CategoryTotal>> {
        self.category_totals_for(CategoryTotalsKey::new(category_id, start, end))
            .await
    }

    pub async fn category_totals_for(
        &self,
        key: CategoryTotalsKey,
    ) -> CoreResult<Vec<CategoryTotal>> {
        self.get_or_fill(category_totals_table, key, || self.fetch_totals(key))
            .await
    }

    /// The ledger's income or expense total between `start` and `end`.
    pub async fn insight_total(
        &self,
        kind: InsightKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Decimal> {
        let upstream = &self.inner.upstream;
        let key = InsightKey { kind, start, end };
        self.get_or_fill(insights_table, key, || {
            upstream.fetch_insight_total(kind, start, end)
        })
        .await
    }

    pub async fn transactions(&self, key: TransactionsKey) -> CoreResult<Vec<TransactionGroup>> {
        let upstream = &self.inner.upstream;
        self.get_or_fill(transactions_table, key, || upstream.fetch_transactions(&key))
            .await
    }

    /// Drops every category-totals entry matched by `invalidation` and schedules a background
    /// re-fetch of each. Returns the number of entries dropped.
    pub fn invalidate(&self, invalidation: Invalidation) -> usize {
        let removed: Vec<CategoryTotalsKey> = {
            let mut tables = lock(&self.inner.tables);
            let slots = &mut tables.category_totals.slots;
            let keys: Vec<_> = slots
                .keys()
                .filter(|key| invalidation.matches(key, self.inner.zone))
                .copied()
                .collect();
            for key in &keys {
                slots.remove(key);
            }
            keys
        };
        debug!(
            "Invalidated {} category totals entries for {invalidation:?}",
            removed.len()
        );
        for key in &removed {
            self.inner.refresh.schedule(*key);
        }
        removed.len()
    }

    /// Empties every table. Fetches in progress will not store their results.
    pub fn invalidate_all(&self) {
        let mut tables = lock(&self.inner.tables);
        *tables = Tables::default();
        debug!("Invalidated the whole cache");
    }

    pub fn invalidate_accounts(&self) {
        lock(&self.inner.tables).accounts.slots.clear();
    }

    pub fn invalidate_transactions(&self) {
        lock(&self.inner.tables).transactions.slots.clear();
    }

    pub fn invalidate_insights(&self) {
        lock(&self.inner.tables).insights.slots.clear();
    }

    /// Schedules background fills for every budget that covers `now`: the whole-span
    /// all-categories key, and for monthly budgets one key per month per allocated category.
    /// Keys that are already present or being fetched are skipped. Returns the number of keys
    /// scheduled.
    pub fn warm(
        &self,
        budgets: &[Budget],
        category_budgets: &[CategoryBudget],
        now: DateTime<Utc>,
    ) -> usize {
        let mut keys = BTreeSet::new();
        for budget in budgets.iter().filter(|b| b.covers(now)) {
            keys.insert(CategoryTotalsKey::aggregate(budget.start, budget.end));
            if !budget.is_monthly() {
                debug!(
                    "Budget {} has reporting interval {}, warming its aggregate only",
                    budget.id, budget.reporting_interval
                );
                continue;
            }
            let allocated: Vec<i64> = category_budgets
                .iter()
                .filter(|cb| cb.budget_id == budget.id)
                .map(|cb| cb.category_id)
                .collect();
            for interval in intervals_at(budget.start, budget.end, self.inner.zone, now) {
                for category_id in &allocated {
                    keys.insert(CategoryTotalsKey::new(
                        *category_id,
                        interval.start_utc(),
                        interval.end_utc(),
                    ));
                }
            }
        }

        let missing: Vec<CategoryTotalsKey> = {
            let tables = lock(&self.inner.tables);
            keys.into_iter()
                .filter(|key| !tables.category_totals.slots.contains_key(key))
                .collect()
        };
        let scheduled = missing
            .into_iter()
            .filter(|key| self.inner.refresh.schedule(*key))
            .count();
        debug!("Warm-up scheduled {scheduled} category totals fetches");
        scheduled
    }

    /// Compares the cached asset-account balances and categories against a fresh fetch. On any
    /// difference the whole cache is dropped and re-warmed. Returns whether drift was found. When
    /// nothing was cached yet the fresh values are stored and no drift is reported.
    pub async fn reconcile(
        &self,
        budgets: &[Budget],
        category_budgets: &[CategoryBudget],
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let upstream = &self.inner.upstream;
        let (accounts, categories) =
            tokio::try_join!(upstream.fetch_accounts(), upstream.fetch_categories())?;

        let drift = {
            let tables = lock(&self.inner.tables);
            let accounts_drifted = tables
                .accounts
                .present(&())
                .is_some_and(|cached| asset_balances(cached) != asset_balances(&accounts));
            let categories_drifted = tables
                .categories
                .present(&())
                .is_some_and(|cached| category_names(cached) != category_names(&categories));
            if accounts_drifted {
                info!("Account balances changed upstream");
            }
            if categories_drifted {
                info!("Categories changed upstream");
            }
            accounts_drifted || categories_drifted
        };

        if drift {
            self.invalidate_all();
        }
        {
            let mut tables = lock(&self.inner.tables);
            tables.accounts.put((), accounts);
            tables.categories.put((), categories);
        }
        if drift {
            self.warm(budgets, category_budgets, now);
        } else {
            trace!("No drift");
        }
        Ok(drift)
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.inner.refresh.stats()
    }

    /// Waits until the refresh queue has no outstanding jobs, polling every few milliseconds.
    pub async fn wait_for_refreshes(&self) {
        while self.refresh_stats().outstanding() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    async fn fetch_totals(&self, key: CategoryTotalsKey) -> CoreResult<Vec<CategoryTotal>> {
        let upstream = &self.inner.upstream;
        if key.is_aggregate() {
            return upstream.fetch_category_totals(key.start, key.end).await;
        }
        let rows = upstream
            .fetch_category_total(key.category_id, key.start, key.end)
            .await?;
        let matching = rows
            .iter()
            .filter(|row| row.category.id == key.category_id)
            .count();
        if rows.len() != 1 || matching != 1 {
            return Err(Error::UpstreamShapeMismatch {
                what: format!("category {} totals", key.category_id),
                expected: 1,
                actual: if rows.len() == 1 { matching } else { rows.len() },
            });
        }
        Ok(rows)
    }

    /// Returns the entry for `key`, joining a fetch in progress or leading a new one.
    async fn get_or_fill<K, V, F, Fut>(
        &self,
        select: Select<K, V>,
        key: K,
        fetch: F,
    ) -> CoreResult<V>
    where
        K: Eq + Hash + Clone + Debug,
        V: Clone,
        F: Fn() -> Fut,
        Fut: Future<Output = CoreResult<V>>,
    {
        loop {
            let step = {
                let mut tables = lock(&self.inner.tables);
                let table = select(&mut tables);
                match table.slots.get(&key) {
                    Some(Slot::Present(value)) => {
                        trace!("Cache hit for {key:?}");
                        return Ok(value.clone());
                    }
                    Some(Slot::Pending { rx, .. }) => Step::Wait(rx.clone()),
                    None => {
                        let flight = self.inner.flights.fetch_add(1, Ordering::Relaxed);
                        let (tx, rx) = watch::channel(None);
                        table
                            .slots
                            .insert(key.clone(), Slot::Pending { flight, rx });
                        Step::Lead(tx, flight)
                    }
                }
            };

            match step {
                Step::Wait(mut rx) => {
                    let published = match rx.wait_for(Option::is_some).await {
                        Ok(result) => (*result).clone(),
                        Err(_) => None,
                    };
                    if let Some(result) = published {
                        return result;
                    }
                    trace!("Fetch for {key:?} was abandoned, retrying");
                }
                Step::Lead(tx, flight) => {
                    return self.lead(select, key, flight, tx, fetch()).await;
                }
            }
        }
    }

    async fn lead<K, V, Fut>(
        &self,
        select: Select<K, V>,
        key: K,
        flight: u64,
        tx: watch::Sender<Published<V>>,
        fetch: Fut,
    ) -> CoreResult<V>
    where
        K: Eq + Hash + Clone + Debug,
        V: Clone,
        Fut: Future<Output = CoreResult<V>>,
    {
        let mut guard = FlightGuard {
            tables: &self.inner.tables,
            select,
            key: key.clone(),
            flight,
            armed: true,
        };
        debug!("Cache miss for {key:?}, fetching");
        let result = fetch.await;
        {
            let mut tables = lock(&self.inner.tables);
            let table = select(&mut tables);
            if table.is_flight(&key, flight) {
                match &result {
                    Ok(value) => {
                        table.slots.insert(key, Slot::Present(value.clone()));
                    }
                    Err(e) => {
                        debug!("Fetch for {key:?} failed: {e}");
                        table.slots.remove(&key);
                    }
                }
            } else {
                debug!("{key:?} was invalidated during its fetch, not storing");
            }
        }
        guard.armed = false;
        tx.send_replace(Some(result.clone()));
        result
    }
}

fn asset_balances(accounts: &[Account]) -> BTreeMap<&str, Decimal> {
    accounts
        .iter()
        .filter(|a| a.is_asset())
        .map(|a| (a.id.as_str(), a.current_balance))
        .collect()
}

fn category_names(categories: &[Category]) -> BTreeMap<i64, &str> {
    categories
        .iter()
        .map(|c| (c.id, c.name.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TestUpstream;
    use crate::model::MONTHLY;
    use chrono::TimeZone;
    use chrono_tz::America::Toronto;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn setup() -> (Arc<TestUpstream>, Cache) {
        let upstream = Arc::new(TestUpstream::default());
        let cache = Cache::new(upstream.clone(), Toronto, CacheOptions::default());
        (upstream, cache)
    }

    fn year_2020() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Toronto
                .with_ymd_and_hms(2020, 1, 1, 0, 0, 0)
                .unwrap()
                .with_timezone(&Utc),
            Toronto
                .with_ymd_and_hms(2020, 12, 31, 23, 59, 59)
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    #[tokio::test]
    async fn test_second_read_is_a_hit() {
        let (upstream, cache) = setup();
        let first = cache.accounts().await.unwrap();
        let second = cache.accounts().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(upstream.calls().accounts, 1);

        let (start, end) = year_2020();
        cache.category_totals(ALL_CATEGORIES, start, end).await.unwrap();
        cache.category_totals(ALL_CATEGORIES, start, end).await.unwrap();
        assert_eq!(upstream.calls().category_totals, 1);
    }

    #[tokio::test]
    async fn test_keys_differing_by_a_second_are_distinct() {
        let (upstream, cache) = setup();
        let (start, end) = year_2020();
        cache.category_totals(1, start, end).await.unwrap();
        cache
            .category_totals(1, start, end - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(upstream.calls().category_total, 2);
    }

    #[tokio::test]
    async fn test_invalidation_refetches_exactly_once() {
        let (upstream, cache) = setup();
        let (start, end) = year_2020();
        cache.category_totals(ALL_CATEGORIES, start, end).await.unwrap();
        cache.category_totals(1, start, end).await.unwrap();
        cache.category_totals(2, start, end).await.unwrap();

        let removed = cache.invalidate(Invalidation {
            year: Some(2020),
            category_id: Some(1),
        });
        // Category 1 and the aggregate, but not category 2.
        assert_eq!(removed, 2);
        cache.wait_for_refreshes().await;

        let calls = upstream.calls();
        assert_eq!(calls.category_totals, 2);
        assert_eq!(calls.category_total, 3);

        cache.category_totals(ALL_CATEGORIES, start, end).await.unwrap();
        cache.category_totals(1, start, end).await.unwrap();
        assert_eq!(upstream.calls(), calls);
        assert_eq!(cache.refresh_stats().completed, 2);
    }

    #[tokio::test]
    async fn test_invalidation_for_another_year_keeps_entries() {
        let (upstream, cache) = setup();
        let (start, end) = year_2020();
        cache.category_totals(1, start, end).await.unwrap();
        let removed = cache.invalidate(Invalidation {
            year: Some(2018),
            category_id: Some(1),
        });
        assert_eq!(removed, 0);
        cache.category_totals(1, start, end).await.unwrap();
        assert_eq!(upstream.calls().category_total, 1);
    }

    #[tokio::test]
    async fn test_invalidation_reads_years_in_the_cache_zone() {
        let (_upstream, cache) = setup();
        // New Year's Eve evening in Toronto is already 2021 in UTC.
        let start = Toronto
            .with_ymd_and_hms(2020, 12, 31, 20, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let end = Toronto
            .with_ymd_and_hms(2020, 12, 31, 23, 59, 59)
            .unwrap()
            .with_timezone(&Utc);
        cache.category_totals(1, start, end).await.unwrap();
        let removed = cache.invalidate(Invalidation {
            year: Some(2020),
            category_id: Some(1),
        });
        assert_eq!(removed, 1);
        cache.wait_for_refreshes().await;
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_not_stored() {
        let (upstream, cache) = setup();
        let (start, end) = year_2020();
        upstream.set_category_total_rows(4, Vec::new());
        let err = cache.category_totals(4, start, end).await.unwrap_err();
        assert_eq!(
            err,
            Error::UpstreamShapeMismatch {
                what: "category 4 totals".into(),
                expected: 1,
                actual: 0
            }
        );
        assert!(cache.category_totals(4, start, end).await.is_err());
        assert_eq!(upstream.calls().category_total, 2);
    }

    #[tokio::test]
    async fn test_row_for_wrong_category_is_a_mismatch() {
        let (upstream, cache) = setup();
        let (start, end) = year_2020();
        upstream.set_category_total_rows(
            4,
            vec![CategoryTotal {
                category: Category::new(5, "Other"),
                spent: dec!(-1),
                earned: Decimal::ZERO,
                start,
                end,
            }],
        );
        let err = cache.category_totals(4, start, end).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamShapeMismatch { actual: 0, .. }));
    }

    #[tokio::test]
    async fn test_empty_aggregate_is_valid() {
        let (upstream, cache) = setup();
        let start = Utc.with_ymd_and_hms(1999, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(1999, 2, 1, 0, 0, 0).unwrap();
        assert!(cache
            .category_totals(ALL_CATEGORIES, start, end)
            .await
            .unwrap()
            .is_empty());
        cache.category_totals(ALL_CATEGORIES, start, end).await.unwrap();
        assert_eq!(upstream.calls().category_totals, 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let (upstream, cache) = setup();
        upstream.fail_with(Error::unavailable("fetch_categories", "timed out"));
        let err = cache.categories().await.unwrap_err();
        assert!(err.is_upstream());

        upstream.clear_failure();
        assert_eq!(cache.categories().await.unwrap().len(), 5);
        cache.categories().await.unwrap();
        assert_eq!(upstream.calls().categories, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_share_one_fetch() {
        let (upstream, cache) = setup();
        upstream.set_delay(Duration::from_millis(50));
        let (start, end) = year_2020();

        let mut handles = Vec::new();
        for i in 0..40 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                match i % 4 {
                    0 => cache.category_totals(1, start, end).await.map(|_| ()),
                    1 => cache.category_totals(2, start, end).await.map(|_| ()),
                    2 => cache
                        .category_totals(ALL_CATEGORIES, start, end)
                        .await
                        .map(|_| ()),
                    _ => cache.accounts().await.map(|_| ()),
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let calls = upstream.calls();
        assert_eq!(calls.category_total, 2);
        assert_eq!(calls.category_totals, 1);
        assert_eq!(calls.accounts, 1);
    }

    #[tokio::test]
    async fn test_waiters_share_the_leaders_error() {
        let (upstream, cache) = setup();
        upstream.set_delay(Duration::from_millis(30));
        upstream.fail_with(Error::unavailable("fetch_accounts", "down"));
        let (a, b) = tokio::join!(cache.accounts(), cache.accounts());
        assert!(a.is_err());
        assert_eq!(a, b);
        assert_eq!(upstream.calls().accounts, 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_does_not_strand_waiters() {
        let (upstream, cache) = setup();
        upstream.set_delay(Duration::from_millis(200));
        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.accounts().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        upstream.set_delay(Duration::ZERO);
        let accounts = tokio::time::timeout(Duration::from_secs(2), cache.accounts())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accounts.len(), 5);
        assert_eq!(upstream.calls().accounts, 2);
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_wins() {
        let (upstream, cache) = setup();
        upstream.set_delay(Duration::from_millis(50));
        let reader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.categories().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate_all();
        assert!(reader.await.unwrap().is_ok());

        upstream.set_delay(Duration::ZERO);
        cache.categories().await.unwrap();
        assert_eq!(upstream.calls().categories, 2);
    }

    fn budget_2020() -> (Budget, Vec<CategoryBudget>) {
        let (start, end) = year_2020();
        let budget = Budget {
            id: 1,
            start,
            end,
            reporting_interval: MONTHLY,
        };
        let allocations = vec![
            CategoryBudget {
                id: 1,
                budget_id: 1,
                category_id: 1,
                amount: dec!(-400),
            },
            CategoryBudget {
                id: 2,
                budget_id: 1,
                category_id: 2,
                amount: dec!(-1500),
            },
            CategoryBudget {
                id: 3,
                budget_id: 99,
                category_id: 3,
                amount: dec!(3000),
            },
        ];
        (budget, allocations)
    }

    #[tokio::test]
    async fn test_warm_schedules_current_budget_keys() {
        let (upstream, cache) = setup();
        let (budget, allocations) = budget_2020();
        let now = Utc.with_ymd_and_hms(2020, 6, 15, 12, 0, 0).unwrap();

        // The aggregate plus January through June for two categories.
        assert_eq!(cache.warm(&[budget.clone()], &allocations, now), 13);
        cache.wait_for_refreshes().await;
        let calls = upstream.calls();
        assert_eq!(calls.category_totals, 1);
        assert_eq!(calls.category_total, 12);

        // Everything is present now.
        assert_eq!(cache.warm(&[budget], &allocations, now), 0);
    }

    #[tokio::test]
    async fn test_warm_ignores_budgets_not_covering_now() {
        let (upstream, cache) = setup();
        let (budget, allocations) = budget_2020();
        let now = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(cache.warm(&[budget], &allocations, now), 0);
        cache.wait_for_refreshes().await;
        assert_eq!(upstream.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_failed_refreshes_are_counted() {
        let (upstream, cache) = setup();
        let (budget, allocations) = budget_2020();
        let now = Utc.with_ymd_and_hms(2020, 2, 15, 12, 0, 0).unwrap();
        upstream.fail_with(Error::unavailable("test", "down"));
        let scheduled = cache.warm(&[budget], &allocations, now) as u64;
        cache.wait_for_refreshes().await;
        let stats = cache.refresh_stats();
        assert_eq!(stats.scheduled, scheduled);
        assert_eq!(stats.failed, scheduled);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_reconcile_first_run_stores_without_drift() {
        let (upstream, cache) = setup();
        let now = Utc::now();
        assert!(!cache.reconcile(&[], &[], now).await.unwrap());
        cache.accounts().await.unwrap();
        cache.categories().await.unwrap();
        let calls = upstream.calls();
        assert_eq!(calls.accounts, 1);
        assert_eq!(calls.categories, 1);

        assert!(!cache.reconcile(&[], &[], now).await.unwrap());
    }

    #[tokio::test]
    async fn test_reconcile_detects_balance_drift() {
        let (upstream, cache) = setup();
        let (start, end) = year_2020();
        cache.accounts().await.unwrap();
        cache.category_totals(ALL_CATEGORIES, start, end).await.unwrap();

        upstream.set_balance("1", dec!(99.99));
        assert!(cache.reconcile(&[], &[], Utc::now()).await.unwrap());

        // The fresh accounts were stored, the totals were dropped.
        upstream.reset_calls();
        let accounts = cache.accounts().await.unwrap();
        assert_eq!(accounts[0].current_balance, dec!(99.99));
        assert_eq!(upstream.calls().accounts, 0);
        cache.category_totals(ALL_CATEGORIES, start, end).await.unwrap();
        assert_eq!(upstream.calls().category_totals, 1);
    }

    #[tokio::test]
    async fn test_reconcile_detects_renamed_category() {
        let (upstream, cache) = setup();
        cache.categories().await.unwrap();
        upstream.rename_category(4, "Restaurants");
        assert!(cache.reconcile(&[], &[], Utc::now()).await.unwrap());
        let categories = cache.categories().await.unwrap();
        assert!(categories.contains(&Category::new(4, "Restaurants")));
    }

    #[tokio::test]
    async fn test_reconcile_failure_propagates() {
        let (upstream, cache) = setup();
        upstream.fail_with(Error::unavailable("fetch_accounts", "down"));
        assert!(cache.reconcile(&[], &[], Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn test_insight_totals_are_cached_by_key() {
        let (upstream, cache) = setup();
        let (start, end) = year_2020();
        let expenses = cache
            .insight_total(InsightKind::Expense, start, end)
            .await
            .unwrap();
        assert_eq!(expenses, dec!(-7501.90));
        cache
            .insight_total(InsightKind::Expense, start, end)
            .await
            .unwrap();
        cache
            .insight_total(InsightKind::Income, start, end)
            .await
            .unwrap();
        assert_eq!(upstream.calls().insight_total, 2);

        cache.invalidate_insights();
        cache
            .insight_total(InsightKind::Expense, start, end)
            .await
            .unwrap();
        assert_eq!(upstream.calls().insight_total, 3);
    }

    #[tokio::test]
    async fn test_transactions_are_cached_by_key() {
        let (upstream, cache) = setup();
        cache.transactions(TransactionsKey::page(1)).await.unwrap();
        cache.transactions(TransactionsKey::page(1)).await.unwrap();
        cache.transactions(TransactionsKey::page(2)).await.unwrap();
        assert_eq!(upstream.calls().transactions, 2);
        cache.invalidate_transactions();
        cache.transactions(TransactionsKey::page(1)).await.unwrap();
        assert_eq!(upstream.calls().transactions, 3);
    }
}
