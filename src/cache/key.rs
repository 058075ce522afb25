use crate::model::InsightKind;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// The category id that stands for "all categories" in a `CategoryTotalsKey`.
pub const ALL_CATEGORIES: i64 = 0;

/// Identifies one cached category-totals query. Keys match exactly; two keys that differ by one
/// second are different entries.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CategoryTotalsKey {
    /// A category id, or `ALL_CATEGORIES` for the per-category breakdown of every category.
    pub category_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CategoryTotalsKey {
    pub fn new(category_id: i64, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            category_id,
            start,
            end,
        }
    }

    /// The all-categories key for a span.
    pub fn aggregate(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(ALL_CATEGORIES, start, end)
    }

    pub fn is_aggregate(&self) -> bool {
        self.category_id == ALL_CATEGORIES
    }
}

/// Identifies one cached income or expense total.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct InsightKey {
    pub kind: InsightKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Identifies one cached page of transactions.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TransactionsKey {
    /// 1-based page number.
    pub page: u32,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl TransactionsKey {
    /// An unfiltered page.
    pub fn page(page: u32) -> Self {
        Self {
            page,
            start: None,
            end: None,
        }
    }
}

impl Default for TransactionsKey {
    fn default() -> Self {
        Self::page(1)
    }
}

/// Selects category-totals entries to drop. Every criterion that is present must hold; an
/// `Invalidation` with no criteria matches everything.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct Invalidation {
    /// Matches keys whose span, read in the cache's time zone, touches this calendar year.
    pub year: Option<i32>,
    /// Matches keys for this category and every all-categories key, since those include it.
    pub category_id: Option<i64>,
}

impl Invalidation {
    /// What a new transaction in `category_id` on `date` makes stale.
    pub fn transaction<D: Datelike>(category_id: i64, date: &D) -> Self {
        Self {
            year: Some(date.year()),
            category_id: Some(category_id),
        }
    }

    /// Whether `key` is stale. The key's bounds are taken in `zone`, the zone the transaction
    /// date was read in.
    pub fn matches(&self, key: &CategoryTotalsKey, zone: Tz) -> bool {
        let first = key.start.with_timezone(&zone).year();
        let last = key.end.with_timezone(&zone).year();
        let year_matches = self.year.is_none_or(|year| first <= year && year <= last);
        let category_matches = self
            .category_id
            .is_none_or(|id| key.category_id == id || key.is_aggregate());
        year_matches && category_matches
    }
}
