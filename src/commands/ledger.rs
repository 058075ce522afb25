//! Commands that read from, or write to, the ledger through the cache.

use crate::cache::TransactionsKey;
use crate::commands::{plural, Out};
use crate::model::{Account, Category, NewTransaction, TransactionGroup};
use crate::{Dashboard, Result};

pub async fn accounts(dashboard: &Dashboard) -> Result<Out<Vec<Account>>> {
    let accounts = dashboard.cache().accounts().await?;
    Ok(Out::new(
        format!("Found {}", plural(accounts.len(), "account", "accounts")),
        accounts,
    ))
}

pub async fn categories(dashboard: &Dashboard) -> Result<Out<Vec<Category>>> {
    let categories = dashboard.cache().categories().await?;
    Ok(Out::new(
        format!("Found {}", plural(categories.len(), "category", "categories")),
        categories,
    ))
}

pub async fn transactions(
    dashboard: &Dashboard,
    key: TransactionsKey,
) -> Result<Out<Vec<TransactionGroup>>> {
    let groups = dashboard.cache().transactions(key).await?;
    Ok(Out::new(
        format!(
            "Found {} on page {}",
            plural(groups.len(), "transaction", "transactions"),
            key.page
        ),
        groups,
    ))
}

pub async fn create_transaction(
    dashboard: &Dashboard,
    transaction: NewTransaction,
) -> Result<Out<TransactionGroup>> {
    let created = dashboard.create_transaction(transaction).await?;
    Ok(Out::new(format!("Created transaction {}", created.id), created))
}
