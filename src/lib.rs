//! budgetboard: budget-vs-actual reports over a slow Firefly-III ledger.
//!
//! Budgets live in a local SQLite store. Actual amounts are read from the ledger through a
//! refreshing [`cache::Cache`] that is invalidated by writes and reconciled on a timer. The
//! [`Dashboard`] wires the pieces together and is shared by the CLI and the MCP server.

mod api;
pub mod args;
pub mod cache;
pub mod commands;
mod config;
mod dashboard;
mod db;
mod error;
pub mod interval;
mod mcp;
pub mod model;
pub mod report;
mod utils;


pub use api::{Calls, FireflyClient, Mode, TestUpstream, Upstream};
pub use config::Config;
pub use dashboard::Dashboard;
pub use db::Db;
pub use error::{CoreResult, Error, Result};
