use crate::model::{Account, AccountType};
use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How money moves between accounts.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Asset account to expense account.
    Withdrawal,
    /// Revenue account to asset account.
    Deposit,
    /// Asset account to asset account.
    Transfer,
    /// Reconciliations, opening balances and anything else the ledger records on its own.
    #[serde(other)]
    Other,
}

serde_plain::derive_display_from_serialize!(TransactionType);
serde_plain::derive_fromstr_from_deserialize!(TransactionType);

/// One split of a ledger transaction.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Transaction {
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub date: DateTime<FixedOffset>,
    pub amount: Decimal,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_name: Option<String>,
}

/// A ledger transaction as listed by the ledger: a titled group of one or more splits.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TransactionGroup {
    pub id: String,
    pub title: String,
    pub splits: Vec<Transaction>,
}

/// A request to record a new transaction. The transaction type is not part of the request; it is
/// derived from the kinds of the source and destination accounts.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub struct NewTransaction {
    /// RFC 3339 timestamp with offset, e.g. `2024-03-05T12:30:00-05:00`.
    #[schemars(with = "String")]
    pub date: DateTime<FixedOffset>,
    /// A positive amount, e.g. `"12.50"`.
    #[schemars(with = "String")]
    pub amount: Decimal,
    pub description: String,
    pub category_id: i64,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub destination_id: Option<String>,
    #[serde(default)]
    pub destination_name: Option<String>,
}

impl NewTransaction {
    /// Checks the fields that do not need the ledger. Returns a description of the first problem.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.description.trim().is_empty() {
            return Err("description must be provided".into());
        }
        if is_blank(&self.source_id) && is_blank(&self.source_name) {
            return Err("source_id or source_name must be provided".into());
        }
        if is_blank(&self.destination_id) && is_blank(&self.destination_name) {
            return Err("destination_id or destination_name must be provided".into());
        }
        if self.amount.is_zero() {
            return Err("amount must be provided".into());
        }
        Ok(())
    }

    /// Works out the transaction type from the known `accounts`. An account referenced by name
    /// only is a new account: a new source paying into an asset account is revenue, and a new
    /// destination paid from an asset account is an expense.
    pub fn transaction_type(&self, accounts: &[Account]) -> Option<TransactionType> {
        let kind_of = |id: &Option<String>| {
            id.as_deref()
                .and_then(|id| accounts.iter().find(|a| a.id == id))
                .map(|a| a.account_type)
        };
        let mut source = kind_of(&self.source_id);
        let mut destination = kind_of(&self.destination_id);

        if source.is_none()
            && !is_blank(&self.source_name)
            && destination == Some(AccountType::Asset)
        {
            source = Some(AccountType::Revenue);
        }
        if destination.is_none()
            && !is_blank(&self.destination_name)
            && source == Some(AccountType::Asset)
        {
            destination = Some(AccountType::Expense);
        }

        match (source?, destination?) {
            (AccountType::Asset, AccountType::Expense) => Some(TransactionType::Withdrawal),
            (AccountType::Revenue, AccountType::Asset) => Some(TransactionType::Deposit),
            (AccountType::Asset, AccountType::Asset) => Some(TransactionType::Transfer),
            _ => None,
        }
    }

    /// The split that is sent to the ledger.
    pub fn into_transaction(self, transaction_type: TransactionType) -> Transaction {
        Transaction {
            transaction_type,
            date: self.date,
            amount: self.amount,
            description: self.description,
            category_id: Some(self.category_id),
            source_id: self.source_id,
            source_name: self.source_name,
            destination_id: self.destination_id,
            destination_name: self.destination_name,
        }
    }
}

fn is_blank(s: &Option<String>) -> bool {
    s.as_deref().map(str::trim).unwrap_or_default().is_empty()
}
