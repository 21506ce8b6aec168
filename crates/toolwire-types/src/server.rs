//! Records describing registered tool servers.
//!
//! All three records are keyed by server id; no other identifier links them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How long a cached tool listing stays valid (24 hours, in milliseconds).
pub const TOOL_CACHE_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Functional configuration for one tool server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Command to launch (e.g. "npx", "uvx") or a reference string.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Authoritative enable/disable flag.
    #[serde(default)]
    pub disabled: bool,
    /// Tool names exempt from confirmation.
    #[serde(default)]
    pub auto_approve: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            ..Self::default()
        }
    }
}

/// Whether a server runs as a local process or is reached over the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    #[default]
    Local,
    Remote,
}

/// Descriptive information about a tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub long_description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub install_path: String,
    #[serde(rename = "type", default)]
    pub plugin_type: PluginType,
    /// Endpoint URL for remote servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Remote connection flavour (e.g. "httpStream", "sse").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub installed_time: i64,
}

/// A single entry of a server's cached tool listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The tool's input schema, serialized as a JSON string.
    #[serde(default)]
    pub input_schema: String,
    #[serde(default)]
    pub cached_at: i64,
}

impl CachedToolInfo {
    pub fn from_tool(tool: &ToolInfo, cached_at: i64) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.to_string(),
            cached_at,
        }
    }

    /// Convert back into a live tool description. An unparseable schema
    /// becomes `null`.
    pub fn to_tool(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: serde_json::from_str(&self.input_schema)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Runtime status of a server, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub server_id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub last_start_time: i64,
    #[serde(default)]
    pub last_stop_time: i64,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub cached_tools: Option<Vec<CachedToolInfo>>,
    #[serde(default)]
    pub tools_cached_time: i64,
}

impl ServerStatus {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            active: false,
            last_start_time: 0,
            last_stop_time: 0,
            error_message: None,
            cached_tools: None,
            tools_cached_time: 0,
        }
    }

    /// True when a non-empty tool listing was cached less than 24h before `now_ms`.
    pub fn has_valid_tool_cache_at(&self, now_ms: i64) -> bool {
        match &self.cached_tools {
            Some(tools) if !tools.is_empty() => {
                now_ms.saturating_sub(self.tools_cached_time) < TOOL_CACHE_TTL_MS
            }
            _ => false,
        }
    }
}

/// A tool as advertised by a live server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    fn status_with_tools(cached_time: i64) -> ServerStatus {
        let mut status = ServerStatus::new("files");
        status.cached_tools = Some(vec![CachedToolInfo {
            name: "read".into(),
            description: String::new(),
            input_schema: "{}".into(),
            cached_at: cached_time,
        }]);
        status.tools_cached_time = cached_time;
        status
    }

    #[test]
    fn tool_cache_valid_at_23_hours() {
        let now = 100 * HOUR_MS;
        assert!(status_with_tools(now - 23 * HOUR_MS).has_valid_tool_cache_at(now));
    }

    #[test]
    fn tool_cache_stale_at_25_hours() {
        let now = 100 * HOUR_MS;
        assert!(!status_with_tools(now - 25 * HOUR_MS).has_valid_tool_cache_at(now));
    }

    #[test]
    fn extreme_cache_time_does_not_overflow() {
        let now = 100 * HOUR_MS;
        assert!(!status_with_tools(i64::MIN).has_valid_tool_cache_at(now));
        assert!(!status_with_tools(i64::MIN + 1).has_valid_tool_cache_at(i64::MAX));
    }

    #[test]
    fn empty_tool_cache_is_never_valid() {
        let mut status = ServerStatus::new("files");
        status.cached_tools = Some(Vec::new());
        status.tools_cached_time = 0;
        assert!(!status.has_valid_tool_cache_at(1));
    }

    #[test]
    fn server_config_uses_camel_case_fields() {
        let json = r#"{
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-filesystem"],
            "autoApprove": ["read_file"],
            "env": {"ROOT": "/sdcard"}
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.command, "npx");
        assert_eq!(config.auto_approve, vec!["read_file"]);
        assert!(!config.disabled);
        assert_eq!(config.env["ROOT"], "/sdcard");
    }

    #[test]
    fn metadata_type_field_is_lowercase() {
        let json = r#"{"id":"web","name":"Web","type":"remote","endpoint":"https://example.com/mcp"}"#;
        let meta: PluginMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.plugin_type, PluginType::Remote);
        let back = serde_json::to_value(&meta).unwrap();
        assert_eq!(back["type"], "remote");
        assert!(back.get("bearerToken").is_none());
    }

    #[test]
    fn cached_tool_schema_survives_conversion() {
        let tool = ToolInfo {
            name: "search".into(),
            description: "Search".into(),
            input_schema: serde_json::json!({"type":"object","properties":{"q":{"type":"string"}}}),
        };
        let cached = CachedToolInfo::from_tool(&tool, 42);
        assert_eq!(cached.cached_at, 42);
        assert_eq!(cached.to_tool(), tool);
    }
}
