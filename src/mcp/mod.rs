//! MCP (Model Context Protocol) server implementation.
//!
//! This module provides an MCP server that exposes budget reports and the ledger as tools for AI
//! agent integration. The server communicates via JSON-RPC over stdio. One `Dashboard` lives as
//! long as the server, so its cache is warmed once and then kept current by the reconciler.

/// Checks if the server has been initialized and returns an error if not.
macro_rules! require_init {
    ($self:expr) => {
        if !$self.check_initialized().await {
            return Self::uninitialized();
        }
    };
}

mod mcp_utils;
mod tools;

use crate::{Config, Dashboard, Mode};
use anyhow::Context;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::model::{
    CallToolResult, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::transport::stdio;
use rmcp::ErrorData as McpError;
use rmcp::{tool_handler, ServerHandler, ServiceExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The budgetboard MCP server.
#[derive(Debug, Clone)]
pub struct BudgetServer {
    initialized: Arc<Mutex<bool>>,
    config: Arc<Config>,
    dashboard: Dashboard,
    tool_router: ToolRouter<BudgetServer>,
}

impl BudgetServer {
    pub fn new(config: Config, dashboard: Dashboard) -> Self {
        Self {
            initialized: Arc::new(Mutex::new(false)),
            config: Arc::new(config),
            dashboard,
            tool_router: Self::tool_router(),
        }
    }

    async fn check_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    fn uninitialized() -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::error(vec![rmcp::model::Content::text(
            "You have not yet initialized the service. Please call __initialize_service__ first.",
        )]))
    }
}

#[tool_handler]
impl ServerHandler for BudgetServer {
    /// Returns server information sent to the MCP client during initialization.
    ///
    /// Agents tend to treat `instructions` as optional reading, so the full usage notes are
    /// returned by the `initialize_service` tool, which must be called before anything else.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "budgetboard".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(include_str!("docs/INTRO.md").into()),
        }
    }
}

/// Transport type for the MCP server.
#[derive(Debug, Default)]
pub(crate) enum Io {
    #[default]
    Stdio,
    /// Mock transport for testing - holds one end of a duplex channel.
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

/// Runs the MCP server with stdio transport or mock transport. This function starts the MCP server
/// and blocks until the client disconnects or an error occurs.
///
/// Before serving, the cache is warmed for the budgets in effect today. While the server runs, a
/// background task reconciles the cache with the ledger every `reconcile_interval_secs`.
///
/// # Arguments
/// - `config`: The `Config` object
/// - `mode`: Whether we are running against a Firefly-III server or the in-memory test ledger
/// - `io`: Whether we are using stdio as the transport or using mock io for testing
pub(crate) async fn run_server(config: Config, mode: Mode, io: Io) -> crate::Result<()> {
    let dashboard = Dashboard::from_config(&config, mode).await?;
    if let Err(e) = dashboard.start().await {
        warn!("Unable to warm the cache: {e}");
    }
    let reconciler = tokio::spawn(
        dashboard
            .clone()
            .run_reconciler(config.reconcile_interval()),
    );

    let server = BudgetServer::new(config, dashboard);
    info!("Starting MCP server...");

    let service = match io {
        Io::Stdio => server.serve(stdio()).await,
        #[cfg(test)]
        Io::Mock(stream) => server.serve(stream).await,
    };
    let service = match service {
        Ok(service) => service,
        Err(e) => {
            reconciler.abort();
            return Err(anyhow::anyhow!("{e}")).context("Failed to start MCP server");
        }
    };

    info!("MCP server running, waiting for requests...");

    // Wait for the server to complete (client disconnects or error)
    let result = service.waiting().await;
    reconciler.abort();
    result
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("MCP server error")?;

    info!("MCP server shut down");
    Ok(())
}
