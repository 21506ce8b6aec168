//! Error types for tool server communication.

use thiserror::Error;

/// Errors from talking to a tool server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Failed to spawn tool server '{name}': {source}")]
    SpawnFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("Tool server '{name}' is not connected")]
    NotConnected { name: String },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("'{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("Tool server '{name}' cannot be started here: {reason}")]
    Unsupported { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
