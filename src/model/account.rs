use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The kind of ledger account. The ledger knows more types than these (liabilities, cash, initial
/// balance accounts, ...); everything we do not reason about is `Other`.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Expense,
    Revenue,
    #[default]
    #[serde(other)]
    Other,
}

serde_plain::derive_display_from_serialize!(AccountType);
serde_plain::derive_fromstr_from_deserialize!(AccountType);

/// A ledger account with its current balance.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub current_balance: Decimal,
    pub include_in_net_worth: bool,
    pub active: bool,
}

impl Account {
    pub fn is_asset(&self) -> bool {
        self.account_type == AccountType::Asset
    }
}
