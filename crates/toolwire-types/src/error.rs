//! Error taxonomy for tool invocation.

use thiserror::Error;

/// Why a tool invocation did not produce a successful result.
///
/// These never cross the invocation boundary as faults: the invoker wraps
/// them in an [`InvocationResult`](crate::InvocationResult).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// Malformed qualified tool name.
    #[error("Invalid tool name '{name}': expected '<server>:<tool>'")]
    Format { name: String },

    /// No server registered under the name, or it could not be connected.
    #[error("{message}")]
    Connectivity { server: String, message: String },

    /// The server is registered and connected but not marked active.
    #[error(
        "Server '{server}' is not active. Activate it with `toolwire activate {server}` and try again."
    )]
    Inactive { server: String },

    /// Failure reported by the tool itself.
    #[error("{}", format_remote(*code, message))]
    Remote { code: Option<i64>, message: String },

    /// Unexpected failure, timeout, or cancellation.
    #[error("Tool execution error: {0}")]
    Internal(String),
}

impl InvokeError {
    /// Short, stable label for the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Format { .. } => "format",
            Self::Connectivity { .. } => "connectivity",
            Self::Inactive { .. } => "inactive",
            Self::Remote { .. } => "remote",
            Self::Internal(_) => "internal",
        }
    }
}

fn format_remote(code: Option<i64>, message: &str) -> String {
    match code {
        Some(code) => format!("[{code}] {message}"),
        None => message.to_string(),
    }
}
