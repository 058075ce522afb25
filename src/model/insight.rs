use serde::{Deserialize, Serialize};

/// Which side of the ledger an insight total sums. Expense totals are negative.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Income,
    Expense,
}

serde_plain::derive_display_from_serialize!(InsightKind);
serde_plain::derive_fromstr_from_deserialize!(InsightKind);
