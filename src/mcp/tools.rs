//! The tools exposed by the budgetboard MCP server.

use crate::cache::TransactionsKey;
use crate::commands;
use crate::mcp::mcp_utils::tool_result;
use crate::mcp::BudgetServer;
use crate::model::NewTransaction;
use chrono::NaiveDate;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::CallToolResult;
use rmcp::ErrorData as McpError;
use rmcp::{tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

/// Parameters for the category_summaries tool.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(title = "CategorySummariesParams")]
pub struct CategorySummariesParams {
    /// The budget to report on. When omitted, the budget in effect today is used.
    #[serde(default)]
    pub budget_id: Option<i64>,
}

/// Parameters for the category_summary_detail tool.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(title = "CategorySummaryDetailParams")]
pub struct CategorySummaryDetailParams {
    /// The `category_budget_id` of a row returned by `category_summaries`.
    pub category_budget_id: i64,
}

/// Parameters for the transactions tool.
#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(title = "TransactionsParams")]
pub struct TransactionsParams {
    /// 1-based page number, 50 transactions per page. Defaults to 1.
    #[serde(default)]
    pub page: Option<u32>,

    /// Only transactions on or after this day, formatted `YYYY-MM-DD`.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub start: Option<NaiveDate>,

    /// Only transactions on or before this day, formatted `YYYY-MM-DD`.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub end: Option<NaiveDate>,
}

impl From<TransactionsParams> for TransactionsKey {
    fn from(params: TransactionsParams) -> Self {
        TransactionsKey {
            page: params.page.unwrap_or(1).max(1),
            start: params.start,
            end: params.end,
        }
    }
}

#[tool_router(vis = "pub(super)")]
impl BudgetServer {
    #[tool]
    /// Initialize the budgetboard MCP service for this session and return usage instructions. You
    /// **MUST** call this **ONCE** before using other tools so that you have the full usage
    /// instructions. You **MAY** call it more than once if you have forgotten the usage
    /// instructions.
    async fn initialize_service(&self) -> Result<CallToolResult, McpError> {
        let mut initialized = self.initialized.lock().await;
        *initialized = true;
        Ok(CallToolResult::success(vec![rmcp::model::Content::text(
            include_str!("docs/INSTRUCTIONS.md"),
        )]))
    }

    /// List all budgets with their ids, start and end instants (UTC) and reporting interval.
    #[tool]
    async fn budgets(&self) -> Result<CallToolResult, McpError> {
        require_init!(self);
        tool_result(commands::list_budgets(&self.config).await)
    }

    /// For each category budget of a budget: the planned `amount`, the actual `sum` over the whole
    /// budget span (earned plus spent, so spending is negative) and the category `name`.
    ///
    /// # Example
    ///
    /// ```json
    /// { "budget_id": 3 }
    /// ```
    #[tool]
    async fn category_summaries(
        &self,
        Parameters(params): Parameters<CategorySummariesParams>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: category_summaries called for {:?}", params.budget_id);
        tool_result(commands::summary(&self.dashboard, params.budget_id).await)
    }

    /// The summary of one category budget together with its month-by-month totals. Months that
    /// have not started yet are not included. Only monthly budgets (reporting interval 0) can be
    /// broken down.
    #[tool]
    async fn category_summary_detail(
        &self,
        Parameters(params): Parameters<CategorySummaryDetailParams>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        tool_result(commands::detail(&self.dashboard, params.category_budget_id).await)
    }

    /// List the active accounts in the ledger with their type and current balance.
    #[tool]
    async fn accounts(&self) -> Result<CallToolResult, McpError> {
        require_init!(self);
        tool_result(commands::accounts(&self.dashboard).await)
    }

    /// List the categories in the ledger. Use their ids when creating transactions.
    #[tool]
    async fn categories(&self) -> Result<CallToolResult, McpError> {
        require_init!(self);
        tool_result(commands::categories(&self.dashboard).await)
    }

    /// List transactions, newest first, 50 per page, optionally limited to a range of days.
    ///
    /// # Example
    ///
    /// ```json
    /// { "page": 1, "start": "2024-03-01", "end": "2024-03-31" }
    /// ```
    #[tool]
    async fn transactions(
        &self,
        Parameters(params): Parameters<TransactionsParams>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        tool_result(commands::transactions(&self.dashboard, params.into()).await)
    }

    /// Record a new transaction in the ledger. Give each side either as an existing account id or
    /// as a name. The transaction type follows from the accounts: asset to expense is a
    /// withdrawal, revenue to asset is a deposit and asset to asset is a transfer. A new name as
    /// the source becomes a revenue account and a new name as the destination becomes an expense
    /// account. Reports that include the transaction are refreshed.
    ///
    /// # Example
    ///
    /// ```json
    /// {
    ///   "date": "2024-03-05T12:30:00-05:00",
    ///   "amount": "12.50",
    ///   "description": "Coffee",
    ///   "category_id": 4,
    ///   "source_id": "1",
    ///   "destination_name": "Corner Cafe"
    /// }
    /// ```
    #[tool]
    async fn create_transaction(
        &self,
        Parameters(transaction): Parameters<NewTransaction>,
    ) -> Result<CallToolResult, McpError> {
        require_init!(self);
        info!("MCP: create_transaction called: {}", transaction.description);
        tool_result(commands::create_transaction(&self.dashboard, transaction).await)
    }

    /// The sum of the current balances of all asset accounts that are included in net worth.
    #[tool]
    async fn net_worth(&self) -> Result<CallToolResult, McpError> {
        require_init!(self);
        tool_result(commands::net_worth(&self.dashboard).await)
    }

    /// Income, expenses and taxes over the last three and twelve months, with net worth. Expenses
    /// and taxes paid are negative.
    #[tool]
    async fn big_picture(&self) -> Result<CallToolResult, McpError> {
        require_init!(self);
        tool_result(commands::big_picture(&self.dashboard).await)
    }
}
