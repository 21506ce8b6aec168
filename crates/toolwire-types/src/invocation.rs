//! The value every tool invocation resolves to.

use crate::error::InvokeError;

/// Outcome of invoking a qualified tool.
///
/// Callers always receive one of these, even when the call failed.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    pub tool_name: String,
    pub success: bool,
    /// Rendered result text on success, the error message otherwise.
    pub message: String,
    pub error: Option<InvokeError>,
}

impl InvocationResult {
    pub fn ok(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(tool_name: impl Into<String>, error: InvokeError) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            message: error.to_string(),
            error: Some(error),
        }
    }
}
