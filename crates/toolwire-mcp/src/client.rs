//! Stdio tool server client.
//!
//! Handles the protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list, following pagination cursors) and tool
//! invocation (tools/call), translating responses into the envelope the
//! invoker consumes.

use crate::error::McpError;
use crate::jsonrpc::JsonRpcResponse;
use crate::stdio::StdioProcess;
use crate::transport::{BoxFuture, ToolTransport, TransportFactory};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex, PoisonError};
use toolwire_types::{PluginMetadata, PluginType, ServerConfig, ToolInfo};

/// Protocol version we speak.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Error code used when a tool reports `isError: true`.
pub const TOOL_ERROR_CODE: i64 = -32000;

/// Upper bound on tools/list pages, in case a server keeps returning cursors.
const MAX_LIST_PAGES: usize = 32;

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolEntry>,
    #[serde(default, rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Client for one locally launched tool server.
pub struct StdioClient {
    name: String,
    config: ServerConfig,
    request_timeout_ms: u64,
    process: Mutex<Option<Arc<StdioProcess>>>,
}

impl StdioClient {
    pub fn new(name: impl Into<String>, config: ServerConfig, request_timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            config,
            request_timeout_ms,
            process: Mutex::new(None),
        }
    }

    fn live_process(&self) -> Result<Arc<StdioProcess>, McpError> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|p| p.is_alive())
            .ok_or_else(|| McpError::NotConnected {
                name: self.name.clone(),
            })
    }

    fn take_process(&self) -> Option<Arc<StdioProcess>> {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn start(&self) -> Result<(), McpError> {
        if self.is_connected() {
            return Ok(());
        }
        // A dead process left from an earlier session.
        if let Some(stale) = self.take_process() {
            shutdown_process(stale).await;
        }

        let process = StdioProcess::spawn(
            &self.config.command,
            &self.config.args,
            &self.config.env,
            self.request_timeout_ms,
        )?;

        let init_params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "toolwire",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let handshake = async {
            let resp = process.send_request("initialize", Some(init_params)).await?;
            if let Some(err) = resp.error {
                return Err(McpError::JsonRpc {
                    server: self.name.clone(),
                    code: err.code,
                    message: err.message,
                });
            }
            process
                .send_notification("notifications/initialized", None)
                .await
        };

        if let Err(e) = handshake.await {
            process.shutdown().await;
            return Err(e);
        }

        tracing::info!(server = %self.name, "Tool server connected");
        *self.process.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(process));
        Ok(())
    }

    async fn fetch_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let process = self.live_process()?;
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let resp = process.send_request("tools/list", params).await?;
            let result = self.expect_result(resp, "tools/list")?;
            let page: ToolsListResult = serde_json::from_value(result).map_err(|e| {
                McpError::Protocol(format!("Failed to parse tools/list response: {e}"))
            })?;

            tools.extend(page.tools.into_iter().map(|t| ToolInfo {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        tracing::debug!(server = %self.name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    async fn invoke(&self, tool_name: &str, arguments: Value) -> Result<Value, McpError> {
        let process = self.live_process()?;
        let params = json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let resp = process.send_request("tools/call", Some(params)).await?;
        Ok(envelope_from_response(resp))
    }

    fn expect_result(&self, resp: JsonRpcResponse, method: &str) -> Result<Value, McpError> {
        if let Some(err) = resp.error {
            return Err(McpError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }
        resp.result
            .ok_or_else(|| McpError::Protocol(format!("{method} response has neither result nor error")))
    }
}

impl ToolTransport for StdioClient {
    fn server_name(&self) -> &str {
        &self.name
    }

    fn connect(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(self.start())
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(process) = self.take_process() {
                shutdown_process(process).await;
                tracing::info!(server = %self.name, "Tool server disconnected");
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.process
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|p| p.is_alive())
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolInfo>, McpError>> {
        Box::pin(self.fetch_tools())
    }

    fn call_tool<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: Value,
    ) -> BoxFuture<'a, Result<Value, McpError>> {
        Box::pin(self.invoke(tool_name, arguments))
    }
}

/// Shut the process down if we hold the last reference; otherwise in-flight
/// calls still use it and `kill_on_drop` reaps it when they finish.
async fn shutdown_process(process: Arc<StdioProcess>) {
    if let Ok(process) = Arc::try_unwrap(process) {
        process.shutdown().await;
    }
}

/// Translate a tools/call response into the envelope the invoker consumes.
pub fn envelope_from_response(resp: JsonRpcResponse) -> Value {
    if let Some(err) = resp.error {
        return json!({
            "success": false,
            "error": {"code": err.code, "message": err.message}
        });
    }

    let mut result = resp.result.unwrap_or(Value::Null);
    let is_error = result
        .as_object_mut()
        .and_then(|obj| obj.remove("isError"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if is_error {
        let message = error_text(&result);
        return json!({
            "success": false,
            "error": {"code": TOOL_ERROR_CODE, "message": message}
        });
    }

    json!({"success": true, "result": result})
}

fn error_text(result: &Value) -> String {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();
    if text.is_empty() {
        "Tool reported an error".to_string()
    } else {
        text
    }
}

/// Creates [`StdioClient`]s for local servers.
pub struct StdioTransportFactory {
    request_timeout_ms: u64,
}

impl StdioTransportFactory {
    pub fn new(request_timeout_ms: u64) -> Self {
        Self { request_timeout_ms }
    }
}

impl TransportFactory for StdioTransportFactory {
    fn create(
        &self,
        name: &str,
        config: &ServerConfig,
        metadata: Option<&PluginMetadata>,
    ) -> Result<Arc<dyn ToolTransport>, McpError> {
        if metadata.is_some_and(|m| m.plugin_type == PluginType::Remote) {
            return Err(McpError::Unsupported {
                name: name.to_string(),
                reason: "remote servers need a network transport".to_string(),
            });
        }
        if config.command.trim().is_empty() {
            return Err(McpError::Unsupported {
                name: name.to_string(),
                reason: "no command configured".to_string(),
            });
        }
        Ok(Arc::new(StdioClient::new(
            name,
            config.clone(),
            self.request_timeout_ms,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> JsonRpcResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn deserialize_tool_entry_without_description() {
        let entry: ToolEntry = serde_json::from_str(r#"{"name": "list"}"#).unwrap();
        assert_eq!(entry.name, "list");
        assert!(entry.description.is_none());
        assert_eq!(entry.input_schema["type"], "object");
    }

    #[test]
    fn deserialize_paginated_tools_list() {
        let json = r#"{
            "tools": [{"name": "a", "description": "Tool A", "inputSchema": {"type": "object"}}],
            "nextCursor": "page-2"
        }"#;
        let page: ToolsListResult = serde_json::from_str(json).unwrap();
        assert_eq!(page.tools.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn envelope_for_successful_call() {
        let env = envelope_from_response(response(
            r#"{"id":1,"result":{"content":[{"type":"text","text":"ok"}],"isError":false}}"#,
        ));
        assert_eq!(env["success"], true);
        assert_eq!(env["result"]["content"][0]["text"], "ok");
        assert!(env["result"].get("isError").is_none());
    }

    #[test]
    fn envelope_for_tool_reported_error() {
        let env = envelope_from_response(response(
            r#"{"id":1,"result":{"content":[{"type":"text","text":"file not found"}],"isError":true}}"#,
        ));
        assert_eq!(env["success"], false);
        assert_eq!(env["error"]["code"], TOOL_ERROR_CODE);
        assert_eq!(env["error"]["message"], "file not found");
    }

    #[test]
    fn envelope_for_jsonrpc_error() {
        let env = envelope_from_response(response(
            r#"{"id":1,"error":{"code":-32602,"message":"Unknown tool"}}"#,
        ));
        assert_eq!(env["success"], false);
        assert_eq!(env["error"]["code"], -32602);
        assert_eq!(env["error"]["message"], "Unknown tool");
    }

    #[test]
    fn factory_rejects_remote_and_empty_command() {
        let factory = StdioTransportFactory::new(1000);
        let mut meta = toolwire_config::autofill::synthesize_metadata("web", 0);
        meta.plugin_type = PluginType::Remote;
        let config = ServerConfig::new("npx", vec![]);

        assert!(matches!(
            factory.create("web", &config, Some(&meta)),
            Err(McpError::Unsupported { .. })
        ));
        assert!(matches!(
            factory.create("empty", &ServerConfig::default(), None),
            Err(McpError::Unsupported { .. })
        ));
        let client = factory.create("files", &config, None).unwrap();
        assert_eq!(client.server_name(), "files");
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn calls_fail_when_not_connected() {
        let client = StdioClient::new("files", ServerConfig::new("cat", vec![]), 1000);
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotConnected { .. })
        ));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn connect_to_silent_server_times_out() {
        let silent = StdioClient::new(
            "silent",
            ServerConfig::new("sleep", vec!["10".into()]),
            100,
        );
        assert!(matches!(
            silent.connect().await,
            Err(McpError::Timeout { .. })
        ));
        assert!(!silent.is_connected());
    }
}
