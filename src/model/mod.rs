//! Types that represent the core data model, such as `Account`, `Category` and `Budget`.
mod account;
mod budget;
mod category;
mod insight;
mod transaction;

pub use account::{Account, AccountType};
pub use budget::{Budget, CategoryBudget, MONTHLY};
pub use category::{Category, CategoryTotal};
pub use insight::InsightKind;
pub use transaction::{NewTransaction, Transaction, TransactionGroup, TransactionType};
