//! Public entry point for running a tool by its qualified name.

use crate::image::ImagePool;
use crate::manager::ConnectionManager;
use crate::render::{render_envelope, truncate_output};
use crate::schema::coerce_arguments;
use crate::transport::ToolTransport;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use toolwire_config::ConfigStore;
use toolwire_config::settings::{DEFAULT_CALL_TIMEOUT_MS, DEFAULT_MAX_RESULT_LENGTH};
use toolwire_types::{InvocationResult, InvokeError, ToolInfo};

/// Split `"<server>:<tool>"` on the first colon. The tool part may contain
/// further colons.
pub fn parse_qualified_name(name: &str) -> Result<(&str, &str), InvokeError> {
    match name.split_once(':') {
        Some((server, tool)) if !server.is_empty() && !tool.is_empty() => Ok((server, tool)),
        _ => Err(InvokeError::Format {
            name: name.to_string(),
        }),
    }
}

/// Resolves, calls and renders tools on registered servers.
pub struct ToolInvoker {
    connections: Arc<ConnectionManager>,
    images: Arc<dyn ImagePool>,
    max_result_length: AtomicUsize,
    call_timeout: Duration,
}

impl ToolInvoker {
    pub fn new(connections: Arc<ConnectionManager>, images: Arc<dyn ImagePool>) -> Self {
        Self {
            connections,
            images,
            max_result_length: AtomicUsize::new(DEFAULT_MAX_RESULT_LENGTH),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }

    /// Bounded wait applied to each tool call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_result_length(self, max_chars: usize) -> Self {
        self.set_max_result_length(max_chars);
        self
    }

    /// Takes effect for invocations that start after the call.
    pub fn set_max_result_length(&self, max_chars: usize) {
        self.max_result_length.store(max_chars, Ordering::Relaxed);
    }

    pub fn max_result_length(&self) -> usize {
        self.max_result_length.load(Ordering::Relaxed)
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    fn store(&self) -> &ConfigStore {
        self.connections.store()
    }

    pub async fn invoke(&self, name: &str, params: HashMap<String, String>) -> InvocationResult {
        self.invoke_with_cancel(name, params, CancellationToken::new())
            .await
    }

    /// Invoke a tool, abandoning the in-flight call if `cancel` fires.
    pub async fn invoke_with_cancel(
        &self,
        name: &str,
        params: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> InvocationResult {
        let (server, tool) = match parse_qualified_name(name) {
            Ok(parts) => parts,
            Err(e) => return InvocationResult::failed(name, e),
        };

        match self.run(server, tool, params, &cancel).await {
            Ok(text) => InvocationResult::ok(name, text),
            Err(e) => {
                tracing::warn!(tool = %name, kind = e.kind(), "Tool invocation failed: {e}");
                InvocationResult::failed(name, e)
            }
        }
    }

    /// Blocking form of [`invoke`](Self::invoke) for callers outside the runtime.
    ///
    /// Must not be called from a runtime worker thread.
    pub fn invoke_blocking(
        &self,
        handle: &Handle,
        name: &str,
        params: HashMap<String, String>,
    ) -> InvocationResult {
        handle.block_on(self.invoke(name, params))
    }

    /// The server's tools: the fresh cache if there is one, else a live
    /// listing which then refreshes the cache.
    pub async fn list_tools(&self, server: &str) -> Result<Vec<ToolInfo>, InvokeError> {
        if let Some(tools) = self.store().cached_tools(server) {
            return Ok(tools);
        }
        let client = self
            .connections
            .get_or_create_client(server)
            .await
            .ok_or_else(|| self.connectivity_error(server))?;
        self.list_live(client.as_ref(), server).await
    }

    async fn run(
        &self,
        server: &str,
        tool: &str,
        params: HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<String, InvokeError> {
        let client = self
            .connections
            .get_or_create_client(server)
            .await
            .ok_or_else(|| self.connectivity_error(server))?;

        let active = self.store().server_status(server).is_some_and(|s| s.active);
        if !active {
            return Err(InvokeError::Inactive {
                server: server.to_string(),
            });
        }

        let schema = self.input_schema(client.as_ref(), server, tool).await;
        let arguments = Value::Object(coerce_arguments(params, schema.as_ref()));
        tracing::debug!(server = %server, tool = %tool, "Calling tool");

        let outcome = match self.call(client.as_ref(), tool, arguments, cancel).await {
            Ok(envelope) => render_envelope(&envelope, self.images.as_ref()),
            Err(e) => Err(e),
        };
        self.record_outcome(server, &outcome).await;

        outcome.map(|text| truncate_output(text, self.max_result_length()))
    }

    async fn call(
        &self,
        client: &dyn ToolTransport,
        tool: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, InvokeError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InvokeError::Internal("invocation cancelled".into())),
            outcome = tokio::time::timeout(self.call_timeout, client.call_tool(tool, arguments)) => {
                match outcome {
                    Ok(Ok(envelope)) => Ok(envelope),
                    Ok(Err(e)) => Err(InvokeError::Internal(e.to_string())),
                    Err(_) => Err(InvokeError::Internal(format!(
                        "timed out after {}ms",
                        self.call_timeout.as_millis()
                    ))),
                }
            }
        }
    }

    /// Schema of `tool`, if the server advertises one. Listing failures only
    /// cost us coercion, so they are logged and ignored.
    async fn input_schema(
        &self,
        client: &dyn ToolTransport,
        server: &str,
        tool: &str,
    ) -> Option<Value> {
        let tools = match self.store().cached_tools(server) {
            Some(tools) => tools,
            None => match self.list_live(client, server).await {
                Ok(tools) => tools,
                Err(e) => {
                    tracing::debug!(server = %server, "Tool listing unavailable: {e}");
                    return None;
                }
            },
        };
        tools
            .into_iter()
            .find(|t| t.name == tool)
            .map(|t| t.input_schema)
    }

    async fn list_live(
        &self,
        client: &dyn ToolTransport,
        server: &str,
    ) -> Result<Vec<ToolInfo>, InvokeError> {
        let tools = match tokio::time::timeout(self.call_timeout, client.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => return Err(InvokeError::Internal(e.to_string())),
            Err(_) => {
                return Err(InvokeError::Internal(format!(
                    "tools/list timed out after {}ms",
                    self.call_timeout.as_millis()
                )));
            }
        };
        let _ = self.store().cache_tools(server, &tools).await;
        Ok(tools)
    }

    async fn record_outcome(&self, server: &str, outcome: &Result<String, InvokeError>) {
        let error = outcome.as_ref().err().map(ToString::to_string);
        let _ = self
            .store()
            .update_server_status(server, |status| match error {
                None => {
                    status.active = true;
                    status.error_message = None;
                }
                Some(message) => status.error_message = Some(message),
            })
            .await;
    }

    fn connectivity_error(&self, server: &str) -> InvokeError {
        let store = self.store();
        let message = if store.server(server).is_none() {
            format!("Server '{server}' is not registered")
        } else if !store.is_enabled(server) {
            format!("Server '{server}' is disabled")
        } else {
            match store.server_status(server).and_then(|s| s.error_message) {
                Some(reason) => format!("Failed to connect to server '{server}': {reason}"),
                None => format!("Failed to connect to server '{server}'"),
            }
        };
        InvokeError::Connectivity {
            server: server.to_string(),
            message,
        }
    }
}
