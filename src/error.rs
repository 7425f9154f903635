//! Error types for membria-core.

use thiserror::Error;

/// Result type alias using membria-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during decision-memory operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Graph store has no open connection
    #[error("NotConnected")]
    NotConnected,

    /// A graph query failed to execute
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input failed shape or range validation
    #[error("Invalid params: {0}")]
    Validation(String),

    /// Unknown tool or method name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Caller-fixable conflict (missing record, duplicate name)
    #[error("{0}")]
    Conflict(String),

    /// Internal invariant violated (illegal state transition, bad arithmetic)
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Pending-signal queue exceeded its hard cap
    #[error("Backpressure: {0}")]
    Backpressure(String),

    /// Local storage (files, index database) error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a query failure from any displayable source.
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a conflict error for a record that does not exist.
    pub fn not_found(kind: &str, id: &str) -> Self {
        Self::Conflict(format!("{} {} not found", kind, id))
    }

    /// Create an invariant-violation error.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// The JSON-RPC 2.0 error code this error maps to at the tool-server
    /// boundary.
    pub fn json_rpc_code(&self) -> i64 {
        match self {
            Self::Validation(_) => -32602,
            Self::UnknownTool(_) => -32601,
            Self::NotConnected
            | Self::QueryFailed(_)
            | Self::Serialization(_)
            | Self::Conflict(_)
            | Self::Invariant(_)
            | Self::Backpressure(_)
            | Self::Storage(_)
            | Self::Config(_)
            | Self::Io(_) => -32603,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::QueryFailed(e.to_string())
    }
}
