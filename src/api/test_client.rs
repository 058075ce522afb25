//! An in-memory ledger that implements `Upstream`.
//!
//! Note: this is compiled even in the "production" version of this app so that we can run the whole
//! app, top-to-bottom, without a ledger server.

use crate::api::Upstream;
use crate::cache::TransactionsKey;
use crate::error::{CoreResult, Error};
use crate::model::{
    Account, AccountType, Category, CategoryTotal, InsightKind, NewTransaction, TransactionGroup,
    TransactionType,
};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const PAGE_SIZE: usize = 50;

/// How many times each `Upstream` operation has been called.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Calls {
    pub accounts: usize,
    pub categories: usize,
    pub category_totals: usize,
    pub category_total: usize,
    pub insight_total: usize,
    pub transactions: usize,
    pub create_transaction: usize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.accounts
            + self.categories
            + self.category_totals
            + self.category_total
            + self.insight_total
            + self.transactions
            + self.create_transaction
    }
}

/// Money moving in or out of a category at an instant. Negative is spending.
#[derive(Debug, Clone)]
struct Activity {
    category_id: i64,
    at: DateTime<Utc>,
    amount: Decimal,
}

#[derive(Debug, Default)]
struct Ledger {
    accounts: Vec<Account>,
    categories: Vec<Category>,
    activity: Vec<Activity>,
    groups: Vec<TransactionGroup>,
    /// Canned answers for `fetch_category_total`, keyed by category.
    category_total_rows: HashMap<i64, Vec<CategoryTotal>>,
    next_group_id: u64,
    calls: Calls,
    failure: Option<Error>,
    delay: Option<Duration>,
}

/// An `Upstream` that keeps its data in memory. By default it is seeded with a few accounts,
/// categories and transactions.
#[derive(Debug)]
pub struct TestUpstream {
    ledger: Mutex<Ledger>,
}

impl Default for TestUpstream {
    fn default() -> Self {
        let upstream = Self::empty();
        upstream.seed();
        upstream
    }
}

impl TestUpstream {
    /// A ledger with no data at all.
    pub fn empty() -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                next_group_id: 1,
                ..Ledger::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        // A panic while holding this lock can only come from a test assertion.
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls
    }

    pub fn reset_calls(&self) {
        self.lock().calls = Calls::default();
    }

    /// Every call fails with `error` until `clear_failure` is called.
    pub fn fail_with(&self, error: Error) {
        self.lock().failure = Some(error);
    }

    pub fn clear_failure(&self) {
        self.lock().failure = None;
    }

    /// Every call sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    pub fn set_accounts(&self, accounts: Vec<Account>) {
        self.lock().accounts = accounts;
    }

    pub fn set_categories(&self, categories: Vec<Category>) {
        self.lock().categories = categories;
    }

    pub fn set_balance(&self, account_id: &str, balance: Decimal) {
        if let Some(account) = self.lock().accounts.iter_mut().find(|a| a.id == account_id) {
            account.current_balance = balance;
        }
    }

    pub fn rename_category(&self, category_id: i64, name: &str) {
        if let Some(category) = self
            .lock()
            .categories
            .iter_mut()
            .find(|c| c.id == category_id)
        {
            category.name = name.to_string();
        }
    }

    /// Records `amount` against `category_id` at `at`. Negative amounts are spending.
    pub fn add_activity(&self, category_id: i64, at: DateTime<Utc>, amount: Decimal) {
        self.lock().activity.push(Activity {
            category_id,
            at,
            amount,
        });
    }

    /// Makes `fetch_category_total` for `category_id` answer with `rows` verbatim.
    pub fn set_category_total_rows(&self, category_id: i64, rows: Vec<CategoryTotal>) {
        self.lock().category_total_rows.insert(category_id, rows);
    }

    fn seed(&self) {
        let mut ledger = self.lock();
        ledger.accounts = vec![
            account("1", "Checking", AccountType::Asset, "2543.17"),
            account("2", "Savings", AccountType::Asset, "12000.00"),
            account("3", "Corner Grocer", AccountType::Expense, "0"),
            account("4", "Landlord", AccountType::Expense, "0"),
            account("5", "Employer", AccountType::Revenue, "0"),
        ];
        ledger.categories = vec![
            Category::new(1, "Groceries"),
            Category::new(2, "Rent"),
            Category::new(3, "Salary"),
            Category::new(4, "Dining"),
            Category::new(5, "Taxes"),
        ];
        drop(ledger);

        // A year of history plus the current month so that a fresh install has something to show.
        let now = Utc::now();
        let this_month = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 12, 0, 0)
            .single()
            .unwrap_or(now);
        let seeds = [
            (1, "2020-01-04T15:00:00Z", "-120.40"),
            (1, "2020-01-19T15:00:00Z", "-117.40"),
            (1, "2020-02-02T15:00:00Z", "54.23"),
            (2, "2020-01-01T12:00:00Z", "-1500.00"),
            (2, "2020-02-01T12:00:00Z", "-1500.00"),
            (3, "2020-01-15T12:00:00Z", "3200.00"),
            (4, "2020-03-07T23:30:00Z", "-64.10"),
            (5, "2020-04-30T16:00:00Z", "-4200.00"),
        ];
        for (category_id, at, amount) in seeds {
            let at = DateTime::parse_from_rfc3339(at);
            if let (Ok(at), Ok(amount)) = (at, Decimal::from_str(amount)) {
                self.add_activity(category_id, at.with_timezone(&Utc), amount);
            }
        }
        self.add_activity(1, this_month, Decimal::new(-8215, 2));
        self.add_activity(2, this_month, Decimal::new(-150000, 2));
        self.add_activity(3, this_month, Decimal::new(320000, 2));
    }

    async fn begin(&self, count: impl FnOnce(&mut Calls)) -> CoreResult<()> {
        let (failure, delay) = {
            let mut ledger = self.lock();
            count(&mut ledger.calls);
            (ledger.failure.clone(), ledger.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn account(id: &str, name: &str, account_type: AccountType, balance: &str) -> Account {
    Account {
        id: id.to_string(),
        name: name.to_string(),
        account_type,
        current_balance: Decimal::from_str(balance).unwrap_or_default(),
        include_in_net_worth: true,
        active: true,
    }
}

impl Ledger {
    /// Sums activity per category within `start..=end`.
    fn totals(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BTreeMap<i64, (Decimal, Decimal)> {
        let mut sums: BTreeMap<i64, (Decimal, Decimal)> = BTreeMap::new();
        for a in self.activity_between(start, end) {
            let entry = sums.entry(a.category_id).or_default();
            if a.amount.is_sign_negative() {
                entry.0 += a.amount;
            } else {
                entry.1 += a.amount;
            }
        }
        sums
    }

    fn activity_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> impl Iterator<Item = &Activity> {
        self.activity
            .iter()
            .filter(move |a| start <= a.at && a.at <= end)
    }

    fn category(&self, id: i64) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    fn adjust_balance(&mut self, account_id: Option<&str>, delta: Decimal) {
        let account = account_id.and_then(|id| self.accounts.iter_mut().find(|a| a.id == id));
        if let Some(account) = account {
            if account.is_asset() {
                account.current_balance += delta;
            }
        }
    }
}

#[async_trait::async_trait]
impl Upstream for TestUpstream {
    async fn fetch_accounts(&self) -> CoreResult<Vec<Account>> {
        self.begin(|c| c.accounts += 1).await?;
        Ok(self
            .lock()
            .accounts
            .iter()
            .filter(|a| a.active)
            .cloned()
            .collect())
    }

    async fn fetch_categories(&self) -> CoreResult<Vec<Category>> {
        self.begin(|c| c.categories += 1).await?;
        Ok(self.lock().categories.clone())
    }

    async fn fetch_category_totals(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CategoryTotal>> {
        self.begin(|c| c.category_totals += 1).await?;
        let ledger = self.lock();
        Ok(ledger
            .totals(start, end)
            .into_iter()
            .map(|(id, (spent, earned))| CategoryTotal {
                category: ledger
                    .category(id)
                    .cloned()
                    .unwrap_or_else(|| Category::new(id, "")),
                spent,
                earned,
                start,
                end,
            })
            .collect())
    }

    async fn fetch_category_total(
        &self,
        category_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Vec<CategoryTotal>> {
        self.begin(|c| c.category_total += 1).await?;
        let ledger = self.lock();
        if let Some(rows) = ledger.category_total_rows.get(&category_id) {
            return Ok(rows.clone());
        }
        let category = ledger.category(category_id).cloned().ok_or_else(|| {
            Error::UpstreamBadStatus {
                operation: "fetch_category_total".to_string(),
                status: 404,
                body: format!("category {category_id} not found"),
            }
        })?;
        let (spent, earned) = ledger
            .totals(start, end)
            .remove(&category_id)
            .unwrap_or_default();
        Ok(vec![CategoryTotal {
            category,
            spent,
            earned,
            start,
            end,
        }])
    }

    async fn fetch_insight_total(
        &self,
        kind: InsightKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoreResult<Decimal> {
        self.begin(|c| c.insight_total += 1).await?;
        let ledger = self.lock();
        let amounts = ledger.activity_between(start, end).map(|a| a.amount);
        Ok(match kind {
            InsightKind::Income => amounts.filter(|a| a.is_sign_positive()).sum(),
            InsightKind::Expense => amounts.filter(|a| a.is_sign_negative()).sum(),
        })
    }

    async fn fetch_transactions(&self, key: &TransactionsKey) -> CoreResult<Vec<TransactionGroup>> {
        self.begin(|c| c.transactions += 1).await?;
        let ledger = self.lock();
        let page = key.page.max(1) as usize;
        Ok(ledger
            .groups
            .iter()
            .rev()
            .filter(|g| {
                g.splits.iter().any(|s| {
                    let day = s.date.date_naive();
                    key.start.is_none_or(|start| start <= day)
                        && key.end.is_none_or(|end| day <= end)
                })
            })
            .skip((page - 1) * PAGE_SIZE)
            .take(PAGE_SIZE)
            .cloned()
            .collect())
    }

    async fn create_transaction(
        &self,
        transaction: NewTransaction,
        transaction_type: TransactionType,
    ) -> CoreResult<TransactionGroup> {
        self.begin(|c| c.create_transaction += 1).await?;
        let mut ledger = self.lock();
        if ledger.category(transaction.category_id).is_none() {
            return Err(Error::UpstreamBadStatus {
                operation: "create_transaction".to_string(),
                status: 422,
                body: format!("category {} not found", transaction.category_id),
            });
        }
        let split = transaction.into_transaction(transaction_type);
        let at = split.date.with_timezone(&Utc);
        let amount = split.amount.abs();
        match transaction_type {
            TransactionType::Withdrawal => {
                ledger.adjust_balance(split.source_id.as_deref(), -amount);
            }
            TransactionType::Deposit => {
                ledger.adjust_balance(split.destination_id.as_deref(), amount);
            }
            TransactionType::Transfer => {
                ledger.adjust_balance(split.source_id.as_deref(), -amount);
                ledger.adjust_balance(split.destination_id.as_deref(), amount);
            }
            TransactionType::Other => {}
        }
        let signed = match transaction_type {
            TransactionType::Withdrawal => Some(-amount),
            TransactionType::Deposit => Some(amount),
            _ => None,
        };
        if let (Some(amount), Some(category_id)) = (signed, split.category_id) {
            ledger.activity.push(Activity {
                category_id,
                at,
                amount,
            });
        }
        let group = TransactionGroup {
            id: ledger.next_group_id.to_string(),
            title: split.description.clone(),
            splits: vec![split],
        };
        ledger.next_group_id += 1;
        ledger.groups.push(group.clone());
        Ok(group)
    }
}
