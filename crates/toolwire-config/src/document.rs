//! On-disk document shapes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use toolwire_types::{PluginMetadata, ServerConfig, ServerStatus};

/// The server/metadata configuration document (`mcp_config.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub mcp_servers: HashMap<String, ServerConfig>,
    #[serde(default)]
    pub plugin_metadata: HashMap<String, PluginMetadata>,
}

/// The runtime status document (`server_status.json`), keyed by server id.
pub type StatusDocument = HashMap<String, ServerStatus>;

/// Read and parse a JSON document, returning the default on any error.
///
/// A missing file is the normal first-run case and is not logged.
pub(crate) async fn read_document<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read_to_string(path).await {
        Ok(data) if data.trim().is_empty() => T::default(),
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            T::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", path.display(), e);
            T::default()
        }
    }
}

/// Write a document atomically: `.tmp` then rename.
pub(crate) async fn write_document(path: &Path, json: String) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, json).await?;
    tokio::fs::rename(&tmp_path, path).await
}
