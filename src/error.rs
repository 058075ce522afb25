//! Error types.
//!
//! Plumbing code (configuration, commands, the binary) uses `anyhow` through the crate-level
//! `Result` alias. The cache, the report aggregator and the upstream client use the typed
//! `Error` taxonomy so callers can tell an unreachable ledger apart from a missing budget. `Error`
//! is `Clone` because a single upstream result is handed to every reader waiting on the same key.

pub type Result<T> = std::result::Result<T, anyhow::Error>;

/// Result type for the cache, the report aggregator and the upstream client.
pub type CoreResult<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The ledger could not be reached, or the request timed out.
    #[error("upstream ledger unavailable during {operation}: {message}")]
    UpstreamUnavailable { operation: String, message: String },

    /// The ledger answered with a non-success status.
    #[error("upstream ledger returned status {status} during {operation}: {body}")]
    UpstreamBadStatus {
        operation: String,
        status: u16,
        body: String,
    },

    /// The ledger answered but the body could not be decoded.
    #[error("malformed upstream response during {operation}: {message}")]
    UpstreamMalformed { operation: String, message: String },

    /// A single-entity query returned the wrong number of rows.
    #[error("expected exactly {expected} row(s) for {what}, got {actual}")]
    UpstreamShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A report needs a category, looked up by name, that the ledger does not have.
    #[error("the ledger has no category named '{0}'")]
    MissingCategory(String),

    #[error("unknown reporting interval {0}, only monthly (0) is supported")]
    UnsupportedReportingInterval(i64),

    /// The budget store failed. The message carries the full context chain.
    #[error("budget store error: {0}")]
    Store(String),

    /// A write request was rejected before reaching the ledger.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    pub(crate) fn unavailable(operation: impl Into<String>, message: impl ToString) -> Self {
        Error::UpstreamUnavailable {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn malformed(operation: impl Into<String>, message: impl ToString) -> Self {
        Error::UpstreamMalformed {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Error::NotFound { entity, id }
    }

    /// True for the errors that originate in the upstream ledger.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::UpstreamUnavailable { .. }
                | Error::UpstreamBadStatus { .. }
                | Error::UpstreamMalformed { .. }
                | Error::UpstreamShapeMismatch { .. }
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Store(format!("{e:#}"))
    }
}
