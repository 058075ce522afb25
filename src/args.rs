//! These structs provide the CLI interface for the budgetboard CLI.

use chrono::{DateTime, FixedOffset, NaiveDate};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

/// budgetboard: budget-vs-actual reports for a Firefly-III ledger.
///
/// Budgets and their per-category allocations are kept in a local SQLite database. The actual
/// amounts come from your Firefly-III server, which can be slow, so they are cached and refreshed
/// in the background.
///
/// There is also a mode in which an AI agent, like Claude, can use this program through the mcp
/// subcommand.
#[derive(Debug, Parser, Clone)]
pub struct Args {
    #[clap(flatten)]
    common: Common,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn new(common: Common, command: Command) -> Self {
        Self { common, command }
    }

    pub fn common(&self) -> &Common {
        &self.common
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create the data directory and initialize the configuration files.
    ///
    /// This is the first command you should run. You need a Firefly-III personal access token
    /// saved to a file; it is moved into $BUDGETBOARD_HOME/.secrets.
    Init(InitArgs),
    /// List, create, update or delete budgets.
    Budget(BudgetArgs),
    /// Replace the category allocations of a budget.
    Allocate(AllocateArgs),
    /// Show planned and actual amounts for every category of a budget.
    Summary(SummaryArgs),
    /// Show the month-by-month totals of one category budget.
    Detail(DetailArgs),
    /// List the active accounts in the ledger.
    Accounts,
    /// List the categories in the ledger.
    Categories,
    /// List transactions, newest first.
    Transactions(TransactionsArgs),
    /// Record a new transaction in the ledger.
    CreateTransaction(Box<CreateTransactionArgs>),
    /// Show the sum of the balances of all asset accounts included in net worth.
    NetWorth,
    /// Show income, expenses and taxes over the last three and twelve months, with net worth.
    BigPicture,
    /// Run an MCP server on stdin/stdout.
    Mcp(McpArgs),
}

/// Arguments common to all subcommands.
#[derive(Debug, Parser, Clone)]
pub struct Common {
    /// The logging verbosity. One of, from least to most verbose:
    /// off, error, warn, info, debug, trace
    ///
    /// This can be overridden by RUST_LOG.
    #[arg(long, default_value_t = LevelFilter::INFO)]
    log_level: LevelFilter,

    /// The directory where budgetboard data and configuration is held. Defaults to ~/budgetboard
    #[arg(long, env = "BUDGETBOARD_HOME", default_value_t = default_home())]
    home: DisplayPath,
}

impl Common {
    pub fn new(log_level: LevelFilter, home: PathBuf) -> Self {
        Self {
            log_level,
            home: home.into(),
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    pub fn home(&self) -> &DisplayPath {
        &self.home
    }
}

/// (Not shown): Args for the `budgetboard init` command.
#[derive(Debug, Parser, Clone)]
pub struct InitArgs {
    /// The base URL of your Firefly-III server, e.g. https://firefly.example.com/
    #[arg(long)]
    upstream_url: String,

    /// A file holding your Firefly-III personal access token. It will be moved to the default
    /// secrets location in the main data directory.
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// The IANA time zone that budget months are computed in, e.g. America/Toronto
    #[arg(long, default_value = "UTC")]
    time_zone: String,
}

impl InitArgs {
    pub fn new(
        upstream_url: impl Into<String>,
        token_file: Option<PathBuf>,
        time_zone: impl Into<String>,
    ) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            token_file,
            time_zone: time_zone.into(),
        }
    }

    pub fn upstream_url(&self) -> &str {
        &self.upstream_url
    }

    pub fn token_file(&self) -> Option<&Path> {
        self.token_file.as_deref()
    }

    pub fn time_zone(&self) -> &str {
        &self.time_zone
    }
}

/// (Not shown): Args for the `budgetboard budget` command.
#[derive(Debug, Parser, Clone)]
pub struct BudgetArgs {
    #[command(subcommand)]
    action: BudgetSubcommand,
}

impl BudgetArgs {
    pub fn action(&self) -> &BudgetSubcommand {
        &self.action
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum BudgetSubcommand {
    /// List all budgets.
    List,
    /// Create a budget, or update it when --id is given.
    Set(BudgetSetArgs),
    /// Delete a budget and its category allocations.
    Delete(IdArgs),
}

/// (Not shown): Args for the `budgetboard budget set` command.
#[derive(Debug, Parser, Clone)]
pub struct BudgetSetArgs {
    /// The budget to update. A new budget is created when omitted.
    #[arg(long)]
    id: Option<i64>,

    /// The first day of the budget, e.g. 2024-01-01
    #[arg(long)]
    start: NaiveDate,

    /// The last day of the budget, inclusive, e.g. 2024-12-31
    #[arg(long)]
    end: NaiveDate,

    /// How the budget is broken down. Only 0, monthly, is supported by reports.
    #[arg(long, default_value_t = 0)]
    reporting_interval: i64,
}

impl BudgetSetArgs {
    pub fn new(id: Option<i64>, start: NaiveDate, end: NaiveDate, reporting_interval: i64) -> Self {
        Self {
            id,
            start,
            end,
            reporting_interval,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn reporting_interval(&self) -> i64 {
        self.reporting_interval
    }
}

/// (Not shown): Args for commands that take a single id.
#[derive(Debug, Parser, Clone)]
pub struct IdArgs {
    id: i64,
}

impl IdArgs {
    pub fn new(id: i64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

/// A planned amount for one category, written `CATEGORY_ID=AMOUNT` on the command line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Allocation {
    pub category_id: i64,
    pub amount: Decimal,
}

impl FromStr for Allocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, amount) = s
            .split_once('=')
            .ok_or_else(|| format!("expected CATEGORY_ID=AMOUNT, got '{s}'"))?;
        let category_id = id
            .trim()
            .parse()
            .map_err(|e| format!("invalid category id '{id}': {e}"))?;
        let amount = amount
            .trim()
            .parse()
            .map_err(|e| format!("invalid amount '{amount}': {e}"))?;
        Ok(Self {
            category_id,
            amount,
        })
    }
}

/// (Not shown): Args for the `budgetboard allocate` command.
#[derive(Debug, Parser, Clone)]
pub struct AllocateArgs {
    /// The budget whose allocations are replaced.
    #[arg(long)]
    budget: i64,

    /// A planned amount as CATEGORY_ID=AMOUNT, e.g. 1=-300.00. Repeat for each category. Omit
    /// to clear all allocations.
    #[arg(long = "category")]
    allocations: Vec<Allocation>,
}

impl AllocateArgs {
    pub fn new(budget: i64, allocations: Vec<Allocation>) -> Self {
        Self {
            budget,
            allocations,
        }
    }

    pub fn budget(&self) -> i64 {
        self.budget
    }

    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }
}

/// (Not shown): Args for the `budgetboard summary` command.
#[derive(Debug, Parser, Clone)]
pub struct SummaryArgs {
    /// The budget to report on. Defaults to the budget in effect today.
    #[arg(long)]
    budget: Option<i64>,
}

impl SummaryArgs {
    pub fn new(budget: Option<i64>) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> Option<i64> {
        self.budget
    }
}

/// (Not shown): Args for the `budgetboard detail` command.
#[derive(Debug, Parser, Clone)]
pub struct DetailArgs {
    /// The category budget id, as shown by `budgetboard summary`.
    id: i64,
}

impl DetailArgs {
    pub fn new(id: i64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

/// (Not shown): Args for the `budgetboard transactions` command.
#[derive(Debug, Parser, Clone)]
pub struct TransactionsArgs {
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Only transactions on or after this day, e.g. 2024-01-01
    #[arg(long)]
    start: Option<NaiveDate>,

    /// Only transactions on or before this day, e.g. 2024-01-31
    #[arg(long)]
    end: Option<NaiveDate>,
}

impl TransactionsArgs {
    pub fn new(page: u32, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { page, start, end }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn start(&self) -> Option<NaiveDate> {
        self.start
    }

    pub fn end(&self) -> Option<NaiveDate> {
        self.end
    }
}

/// (Not shown): Args for the `budgetboard create-transaction` command.
///
/// Give each account either by id, for accounts that exist, or by name. A new name as the source
/// creates a revenue account and a new name as the destination creates an expense account.
#[derive(Debug, Parser, Clone)]
pub struct CreateTransactionArgs {
    /// When the transaction happened, as RFC 3339, e.g. 2024-03-05T12:30:00-05:00
    #[arg(long)]
    date: DateTime<FixedOffset>,

    /// A positive amount, e.g. 12.50
    #[arg(long)]
    amount: Decimal,

    #[arg(long)]
    description: String,

    #[arg(long)]
    category_id: i64,

    #[arg(long)]
    source_id: Option<String>,

    #[arg(long)]
    source_name: Option<String>,

    #[arg(long)]
    destination_id: Option<String>,

    #[arg(long)]
    destination_name: Option<String>,
}

impl CreateTransactionArgs {
    pub fn date(&self) -> DateTime<FixedOffset> {
        self.date
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn category_id(&self) -> i64 {
        self.category_id
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn destination_id(&self) -> Option<&str> {
        self.destination_id.as_deref()
    }

    pub fn destination_name(&self) -> Option<&str> {
        self.destination_name.as_deref()
    }
}

/// (Not shown): Args for the `budgetboard mcp` command.
#[derive(Debug, Parser, Clone)]
pub struct McpArgs {}

fn default_home() -> DisplayPath {
    DisplayPath(match dirs::home_dir() {
        Some(home) => home.join("budgetboard"),
        None => {
            error!(
                "There was an error when trying to get your home directory. You can get around \
                this by providing --home or BUDGETBOARD_HOME instead of relying on the default \
                home directory. If you continue using the program right now, you may have \
                problems!",
            );
            PathBuf::from("budgetboard")
        }
    })
}

#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DisplayPath(PathBuf);

impl From<PathBuf> for DisplayPath {
    fn from(value: PathBuf) -> Self {
        DisplayPath(value)
    }
}

impl Deref for DisplayPath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<Path> for DisplayPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl Display for DisplayPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_string_lossy())
    }
}

impl FromStr for DisplayPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(PathBuf::from(s)))
    }
}

impl DisplayPath {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}
