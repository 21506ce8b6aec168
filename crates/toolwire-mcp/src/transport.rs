//! The capability interface every tool server connection implements.

use crate::error::McpError;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use toolwire_types::{PluginMetadata, ServerConfig, ToolInfo};

/// A boxed, sendable future borrowed from the transport.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handle to one tool server.
///
/// Dyn-compatible so the connection cache can hold `Arc<dyn ToolTransport>`
/// regardless of how the server is reached. `call_tool` resolves to the
/// response envelope: `{"success": bool, "result": {...}, "error": {...}}`.
pub trait ToolTransport: Send + Sync {
    /// Name of the server this handle talks to.
    fn server_name(&self) -> &str;

    /// Establish the connection. Connecting an already connected handle is a no-op.
    fn connect(&self) -> BoxFuture<'_, Result<(), McpError>>;

    fn disconnect(&self) -> BoxFuture<'_, ()>;

    /// Non-blocking liveness check.
    fn is_connected(&self) -> bool;

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolInfo>, McpError>>;

    fn call_tool<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: Value,
    ) -> BoxFuture<'a, Result<Value, McpError>>;
}

/// Builds unconnected transports from stored configuration.
pub trait TransportFactory: Send + Sync {
    fn create(
        &self,
        name: &str,
        config: &ServerConfig,
        metadata: Option<&PluginMetadata>,
    ) -> Result<Arc<dyn ToolTransport>, McpError>;
}
