use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ledger category. The `id` is stable; the `name` may be changed in the ledger at any time.
#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Category {
    pub id: i64,
    pub name: String,
}

impl Category {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The net earned and spent amounts for one category over one explicit period, as reported by the
/// ledger. `spent` is zero or negative, `earned` is zero or positive.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CategoryTotal {
    #[serde(flatten)]
    pub category: Category,
    pub spent: Decimal,
    pub earned: Decimal,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CategoryTotal {
    /// The net amount for the category in the period: `earned + spent`.
    pub fn net(&self) -> Decimal {
        self.earned + self.spent
    }
}
