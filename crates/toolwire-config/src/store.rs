//! Persistent tool server store backed by two JSON documents.
//!
//! Memory is the source of truth. Every mutation updates memory first and then
//! rewrites both documents under a single writer lock, so a failed write never
//! loses the in-memory change and two writes never interleave.

use crate::autofill;
use crate::document::{ConfigDocument, StatusDocument, read_document, write_document};
use crate::error::{MergeError, StoreError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use toolwire_types::{CachedToolInfo, PluginMetadata, ServerConfig, ServerStatus, ToolInfo};

/// File name of the server/metadata document.
pub const CONFIG_FILE: &str = "mcp_config.json";

/// File name of the status document.
pub const STATUS_FILE: &str = "server_status.json";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Default)]
struct StoreState {
    config: ConfigDocument,
    status: StatusDocument,
}

impl StoreState {
    /// Restore the store invariants. Returns true if anything changed.
    fn reconcile(&mut self, now_ms: i64) -> bool {
        let filled = autofill::fill_missing_metadata(&mut self.config, now_ms);

        let before = self.status.len();
        let metadata = &self.config.plugin_metadata;
        self.status.retain(|id, _| metadata.contains_key(id));
        let collected = before - self.status.len();
        if collected > 0 {
            tracing::debug!("Dropped {collected} status entries without metadata");
        }

        let mut initialized = 0;
        for id in self.config.mcp_servers.keys() {
            if !self.status.contains_key(id) {
                self.status.insert(id.clone(), ServerStatus::new(id.clone()));
                initialized += 1;
            }
        }

        filled + collected + initialized > 0
    }

    /// Status entry for a registered server, created if absent. `None` for
    /// ids with no configuration, so a removed server never gets one back.
    fn status_mut(&mut self, id: &str) -> Option<&mut ServerStatus> {
        if !self.config.mcp_servers.contains_key(id) {
            return None;
        }
        Some(
            self.status
                .entry(id.to_string())
                .or_insert_with(|| ServerStatus::new(id)),
        )
    }
}

/// Owner of server configurations, plugin metadata and server status.
pub struct ConfigStore {
    config_path: PathBuf,
    status_path: PathBuf,
    state: RwLock<StoreState>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ConfigStore {
    /// Open the store in `dir`, creating the directory if needed.
    ///
    /// Missing documents start empty. Reconciliation runs immediately and the
    /// documents are rewritten only if it changed something.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        let store = Self {
            config_path: dir.join(CONFIG_FILE),
            status_path: dir.join(STATUS_FILE),
            state: RwLock::new(StoreState::default()),
            write_lock: tokio::sync::Mutex::new(()),
        };
        store.reload().await?;
        Ok(store)
    }

    /// Re-read both documents from disk, replacing the in-memory state.
    pub async fn reload(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut state = StoreState {
            config: read_document(&self.config_path).await,
            status: read_document(&self.status_path).await,
        };
        let changed = state.reconcile(now_ms());
        tracing::debug!(
            servers = state.config.mcp_servers.len(),
            metadata = state.config.plugin_metadata.len(),
            "Loaded tool server configuration"
        );
        *self.write() = state;
        if changed {
            self.write_files().await?;
        }
        Ok(())
    }

    /// Path of the server/metadata document.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    // ---------------------------------------------------------------------
    // Servers
    // ---------------------------------------------------------------------

    pub fn server(&self, id: &str) -> Option<ServerConfig> {
        self.read().config.mcp_servers.get(id).cloned()
    }

    pub fn servers(&self) -> HashMap<String, ServerConfig> {
        self.read().config.mcp_servers.clone()
    }

    /// Sorted ids of all registered servers.
    pub fn server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().config.mcp_servers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Insert or replace a server configuration and persist.
    ///
    /// The in-memory change always applies; a persistence failure is logged
    /// and returned.
    pub async fn add_or_update_server(
        &self,
        id: &str,
        config: ServerConfig,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.write();
            state.config.mcp_servers.insert(id.to_string(), config);
            state.reconcile(now_ms());
        }
        tracing::info!(server = %id, "Registered tool server");
        self.save().await
    }

    /// Remove a server together with its metadata and status.
    ///
    /// Returns whether anything was removed.
    pub async fn remove_server(&self, id: &str) -> Result<bool, StoreError> {
        let removed = {
            let mut state = self.write();
            let server = state.config.mcp_servers.remove(id).is_some();
            let metadata = state.config.plugin_metadata.remove(id).is_some();
            let status = state.status.remove(id).is_some();
            server || metadata || status
        };
        if !removed {
            return Ok(false);
        }
        tracing::info!(server = %id, "Removed tool server");
        self.save().await?;
        Ok(true)
    }

    /// Flip the enable flag. Returns false if the server is unknown.
    pub async fn set_server_enabled(&self, id: &str, enabled: bool) -> Result<bool, StoreError> {
        let found = match self.write().config.mcp_servers.get_mut(id) {
            Some(config) => {
                config.disabled = !enabled;
                true
            }
            None => false,
        };
        if found {
            self.save().await?;
        }
        Ok(found)
    }

    /// True unless the server is explicitly disabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        self.read()
            .config
            .mcp_servers
            .get(id)
            .is_none_or(|config| !config.disabled)
    }

    /// Merge a JSON document of server configurations into the store.
    ///
    /// Accepts `{"mcpServers": {...}}`, optionally with a `pluginMetadata`
    /// section. Incoming keys replace existing entries; absent keys are left
    /// alone. Returns the number of servers merged.
    pub async fn merge_from_json(&self, doc: &str) -> Result<usize, MergeError> {
        let incoming = parse_merge_document(doc)?;
        let count = incoming.mcp_servers.len();
        {
            let mut state = self.write();
            state.config.mcp_servers.extend(incoming.mcp_servers);
            state.config.plugin_metadata.extend(incoming.plugin_metadata);
            state.reconcile(now_ms());
        }
        tracing::info!("Merged {count} tool servers from JSON");
        self.save().await?;
        Ok(count)
    }

    /// Serialize the current server/metadata document.
    pub fn export_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.read().config)?)
    }

    // ---------------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------------

    pub fn metadata(&self, id: &str) -> Option<PluginMetadata> {
        self.read().config.plugin_metadata.get(id).cloned()
    }

    pub fn all_metadata(&self) -> HashMap<String, PluginMetadata> {
        self.read().config.plugin_metadata.clone()
    }

    /// Insert or replace a metadata entry, keyed by its `id`.
    pub async fn add_or_update_metadata(&self, metadata: PluginMetadata) -> Result<(), StoreError> {
        self.write()
            .config
            .plugin_metadata
            .insert(metadata.id.clone(), metadata);
        self.save().await
    }

    // ---------------------------------------------------------------------
    // Status
    // ---------------------------------------------------------------------

    pub fn server_status(&self, id: &str) -> Option<ServerStatus> {
        self.read().status.get(id).cloned()
    }

    pub fn all_status(&self) -> StatusDocument {
        self.read().status.clone()
    }

    /// Apply `update` to the server's status (created if absent) and persist.
    ///
    /// Returns false without writing anything if `id` is not a registered
    /// server.
    pub async fn update_server_status<F>(&self, id: &str, update: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut ServerStatus),
    {
        let applied = match self.write().status_mut(id) {
            Some(status) => {
                update(status);
                true
            }
            None => false,
        };
        if !applied {
            tracing::debug!(server = %id, "Ignoring status update for unregistered server");
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    /// Mark a server active or inactive, stamping the start or stop time.
    pub async fn set_server_active(&self, id: &str, active: bool) -> Result<(), StoreError> {
        let now = now_ms();
        tracing::debug!(server = %id, active, "Server activity changed");
        self.update_server_status(id, |status| {
            status.active = active;
            if active {
                status.last_start_time = now;
                status.error_message = None;
            } else {
                status.last_stop_time = now;
            }
        })
        .await
        .map(|_| ())
    }

    /// Replace the cached tool listing for a server.
    pub async fn cache_tools(&self, id: &str, tools: &[ToolInfo]) -> Result<(), StoreError> {
        let now = now_ms();
        let cached = tools
            .iter()
            .map(|tool| CachedToolInfo::from_tool(tool, now))
            .collect();
        self.update_server_status(id, |status| {
            status.cached_tools = Some(cached);
            status.tools_cached_time = now;
        })
        .await
        .map(|_| ())
    }

    pub async fn clear_tool_cache(&self, id: &str) -> Result<(), StoreError> {
        self.update_server_status(id, |status| {
            status.cached_tools = None;
            status.tools_cached_time = 0;
        })
        .await
        .map(|_| ())
    }

    pub fn has_valid_tool_cache(&self, id: &str) -> bool {
        self.has_valid_tool_cache_at(id, now_ms())
    }

    pub fn has_valid_tool_cache_at(&self, id: &str, now_ms: i64) -> bool {
        self.read()
            .status
            .get(id)
            .is_some_and(|status| status.has_valid_tool_cache_at(now_ms))
    }

    /// The cached tool listing, if it is still fresh.
    pub fn cached_tools(&self, id: &str) -> Option<Vec<ToolInfo>> {
        let now = now_ms();
        let state = self.read();
        let status = state.status.get(id)?;
        if !status.has_valid_tool_cache_at(now) {
            return None;
        }
        status
            .cached_tools
            .as_ref()
            .map(|tools| tools.iter().map(CachedToolInfo::to_tool).collect())
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    /// Write both documents, logging any failure.
    pub async fn save(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let result = self.write_files().await;
        if let Err(e) = &result {
            tracing::warn!("Failed to persist tool server configuration: {e}");
        }
        result
    }

    /// Caller must hold `write_lock`.
    async fn write_files(&self) -> Result<(), StoreError> {
        let (config_json, status_json) = {
            let state = self.read();
            (
                serde_json::to_string_pretty(&state.config)?,
                serde_json::to_string_pretty(&state.status)?,
            )
        };
        write_document(&self.config_path, config_json).await?;
        write_document(&self.status_path, status_json).await?;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_merge_document(doc: &str) -> Result<ConfigDocument, MergeError> {
    let value: serde_json::Value = serde_json::from_str(doc)
        .map_err(|e| MergeError::Format(format!("not valid JSON: {e}")))?;

    let servers = value
        .get("mcpServers")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| MergeError::Format("missing 'mcpServers' object".to_string()))?;
    if servers.is_empty() {
        return Err(MergeError::Empty);
    }

    let mut incoming = ConfigDocument::default();
    for (id, entry) in servers {
        let config: ServerConfig = serde_json::from_value(entry.clone())
            .map_err(|e| MergeError::Format(format!("server '{id}': {e}")))?;
        incoming.mcp_servers.insert(id.clone(), config);
    }

    if let Some(metadata) = value.get("pluginMetadata") {
        incoming.plugin_metadata = serde_json::from_value(metadata.clone())
            .map_err(|e| MergeError::Format(format!("pluginMetadata: {e}")))?;
    }

    Ok(incoming)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (ConfigStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = ConfigStore::open(tmp.path()).await.unwrap();
        (store, tmp)
    }

    fn npx(package: &str) -> ServerConfig {
        ServerConfig::new("npx", vec!["-y".into(), package.into()])
    }

    #[tokio::test]
    async fn open_empty_dir() {
        let (store, _tmp) = test_store().await;
        assert!(store.servers().is_empty());
        assert!(store.all_metadata().is_empty());
        assert!(!store.config_path().exists());
    }

    #[tokio::test]
    async fn add_server_fills_metadata_and_status() {
        let (store, _tmp) = test_store().await;
        store
            .add_or_update_server("web_search", npx("web-search"))
            .await
            .unwrap();

        assert_eq!(store.metadata("web_search").unwrap().name, "Web Search");
        let status = store.server_status("web_search").unwrap();
        assert_eq!(status.server_id, "web_search");
        assert!(!status.active);
        assert!(store.config_path().exists());
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        let first = store.metadata("files").unwrap();
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        assert_eq!(store.servers().len(), 1);
        assert_eq!(store.metadata("files").unwrap(), first);
    }

    #[tokio::test]
    async fn remove_cascades() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        assert!(store.remove_server("files").await.unwrap());
        assert!(store.server("files").is_none());
        assert!(store.metadata("files").is_none());
        assert!(store.server_status("files").is_none());
        assert!(!store.remove_server("files").await.unwrap());
    }

    #[tokio::test]
    async fn enable_flag() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        assert!(store.is_enabled("files"));
        assert!(store.set_server_enabled("files", false).await.unwrap());
        assert!(!store.is_enabled("files"));
        assert!(store.server("files").unwrap().disabled);
        assert!(!store.set_server_enabled("missing", false).await.unwrap());
        assert!(store.is_enabled("missing"));
    }

    #[tokio::test]
    async fn merge_replaces_present_keys_only() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("x", npx("old-x")).await.unwrap();
        store.add_or_update_server("y", npx("y")).await.unwrap();

        let count = store
            .merge_from_json(r#"{"mcpServers": {"x": {"command": "uvx", "args": ["new-x"]}}}"#)
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(store.server("x").unwrap().command, "uvx");
        assert_eq!(store.server("x").unwrap().args, vec!["new-x"]);
        assert_eq!(store.server("y").unwrap(), npx("y"));
    }

    #[tokio::test]
    async fn merge_rejects_malformed_documents() {
        let (store, _tmp) = test_store().await;
        assert!(matches!(
            store.merge_from_json("not json").await,
            Err(MergeError::Format(_))
        ));
        assert!(matches!(
            store.merge_from_json(r#"{"servers": {}}"#).await,
            Err(MergeError::Format(_))
        ));
        assert!(matches!(
            store.merge_from_json(r#"{"mcpServers": []}"#).await,
            Err(MergeError::Format(_))
        ));
        assert!(matches!(
            store.merge_from_json(r#"{"mcpServers": {"bad": {"args": "nope"}}}"#).await,
            Err(MergeError::Format(_))
        ));
        assert!(matches!(
            store.merge_from_json(r#"{"mcpServers": {}}"#).await,
            Err(MergeError::Empty)
        ));
        assert!(store.servers().is_empty());
    }

    #[tokio::test]
    async fn merge_keeps_supplied_metadata() {
        let (store, _tmp) = test_store().await;
        let doc = r#"{
            "mcpServers": {"web": {"command": "uvx"}},
            "pluginMetadata": {"web": {"id": "web", "name": "Web Tools", "author": "acme"}}
        }"#;
        store.merge_from_json(doc).await.unwrap();
        let meta = store.metadata("web").unwrap();
        assert_eq!(meta.name, "Web Tools");
        assert_eq!(meta.author, "acme");
    }

    #[tokio::test]
    async fn status_without_metadata_is_collected_on_load() {
        let tmp = TempDir::new().unwrap();
        let orphan = serde_json::json!({
            "ghost": {"serverId": "ghost", "active": true}
        });
        tokio::fs::write(tmp.path().join(STATUS_FILE), orphan.to_string())
            .await
            .unwrap();

        let store = ConfigStore::open(tmp.path()).await.unwrap();
        assert!(store.server_status("ghost").is_none());
    }

    #[tokio::test]
    async fn set_active_stamps_times() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        store
            .update_server_status("files", |s| s.error_message = Some("boom".into()))
            .await
            .unwrap();

        store.set_server_active("files", true).await.unwrap();
        let status = store.server_status("files").unwrap();
        assert!(status.active);
        assert!(status.last_start_time > 0);
        assert!(status.error_message.is_none());

        store.set_server_active("files", false).await.unwrap();
        let status = store.server_status("files").unwrap();
        assert!(!status.active);
        assert!(status.last_stop_time >= status.last_start_time);
    }

    #[tokio::test]
    async fn status_updates_for_removed_server_are_ignored() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        store.remove_server("files").await.unwrap();

        let applied = store
            .update_server_status("files", |s| s.error_message = Some("late".into()))
            .await
            .unwrap();
        assert!(!applied);
        store.set_server_active("files", true).await.unwrap();
        store.cache_tools("files", &[]).await.unwrap();
        assert!(store.server_status("files").is_none());

        store.reload().await.unwrap();
        assert!(store.all_status().is_empty());
    }

    #[tokio::test]
    async fn tool_cache_lifecycle() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        assert!(!store.has_valid_tool_cache("files"));
        assert!(store.cached_tools("files").is_none());

        let tools = vec![ToolInfo {
            name: "read_file".into(),
            description: "Read a file".into(),
            input_schema: serde_json::json!({"type": "object"}),
        }];
        store.cache_tools("files", &tools).await.unwrap();
        assert!(store.has_valid_tool_cache("files"));
        assert_eq!(store.cached_tools("files").unwrap(), tools);

        let day_later = now_ms() + toolwire_types::TOOL_CACHE_TTL_MS + 1;
        assert!(!store.has_valid_tool_cache_at("files", day_later));

        store.clear_tool_cache("files").await.unwrap();
        assert!(!store.has_valid_tool_cache("files"));
    }

    #[tokio::test]
    async fn export_json_is_a_config_document() {
        let (store, _tmp) = test_store().await;
        store.add_or_update_server("files", npx("fs")).await.unwrap();
        let json = store.export_json().unwrap();
        let doc: ConfigDocument = serde_json::from_str(&json).unwrap();
        assert!(doc.mcp_servers.contains_key("files"));
        assert!(doc.plugin_metadata.contains_key("files"));
    }
}
