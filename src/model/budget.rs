use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The only reporting interval the reports understand: calendar months.
pub const MONTHLY: i64 = 0;

/// A planning period. Stored locally, never in the ledger.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Budget {
    pub id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reporting_interval: i64,
}

impl Budget {
    /// True if `now` falls strictly inside the budget's span.
    pub fn covers(&self, now: DateTime<Utc>) -> bool {
        self.start < now && now < self.end
    }

    pub fn is_monthly(&self) -> bool {
        self.reporting_interval == MONTHLY
    }
}

/// The planned allocation for one category within one budget. There is at most one per
/// `(budget_id, category_id)` pair.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CategoryBudget {
    pub id: i64,
    pub budget_id: i64,
    pub category_id: i64,
    pub amount: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_budget_covers_is_exclusive() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
        let budget = Budget {
            id: 1,
            start,
            end,
            reporting_interval: MONTHLY,
        };
        assert!(budget.covers(Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()));
        assert!(!budget.covers(start));
        assert!(!budget.covers(end));
        assert!(!budget.covers(Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap()));
    }
}
