//! Connection cache: at most one live transport per server name.

use crate::error::McpError;
use crate::transport::{ToolTransport, TransportFactory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use toolwire_config::{ConfigStore, StoreError};
use toolwire_types::ServerConfig;

type Gate = Arc<tokio::sync::Mutex<()>>;

/// Owns the live transports for every registered tool server.
///
/// Lookups, connects and evictions for one server name run under that name's
/// gate, so concurrent callers share a single connect attempt instead of each
/// creating a client.
pub struct ConnectionManager {
    store: Arc<ConfigStore>,
    factory: Arc<dyn TransportFactory>,
    clients: RwLock<HashMap<String, Arc<dyn ToolTransport>>>,
    gates: Mutex<HashMap<String, Gate>>,
    connect_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        store: Arc<ConfigStore>,
        factory: Arc<dyn TransportFactory>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            store,
            factory,
            clients: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            connect_timeout,
        }
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// A connected client for `name`, creating or reconnecting one if needed.
    ///
    /// Returns `None` when the server is not registered, is disabled, or
    /// could not be connected. The reason for a failed connect is recorded
    /// in the server's status.
    pub async fn get_or_create_client(&self, name: &str) -> Option<Arc<dyn ToolTransport>> {
        let gate = self.gate(name);
        let _guard = gate.lock().await;

        if let Some(client) = self.cached(name) {
            if client.is_connected() {
                return Some(client);
            }
            tracing::debug!(server = %name, "Cached client lost its connection, reconnecting");
            match self.connect(&client).await {
                Ok(()) => {
                    self.mark_connected(name).await;
                    return Some(client);
                }
                Err(e) => {
                    tracing::warn!(server = %name, "Reconnect failed, evicting client: {e}");
                    self.remove_cached(name);
                    client.disconnect().await;
                    self.mark_failed(name, &e).await;
                }
            }
        }

        let Some(config) = self.store.server(name) else {
            tracing::debug!(server = %name, "No configuration for tool server");
            return None;
        };
        if config.disabled {
            tracing::debug!(server = %name, "Tool server is disabled, not connecting");
            return None;
        }

        let metadata = self.store.metadata(name);
        let client = match self.factory.create(name, &config, metadata.as_ref()) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(server = %name, "Cannot create client: {e}");
                self.mark_failed(name, &e).await;
                return None;
            }
        };

        match self.connect(&client).await {
            Ok(()) => {
                self.write_clients()
                    .insert(name.to_string(), Arc::clone(&client));
                self.mark_connected(name).await;
                Some(client)
            }
            Err(e) => {
                tracing::warn!(server = %name, "Failed to connect: {e}");
                client.disconnect().await;
                self.mark_failed(name, &e).await;
                None
            }
        }
    }

    /// Store a new configuration and drop any client built from the old one.
    pub async fn register_server(&self, name: &str, config: ServerConfig) -> Result<(), StoreError> {
        let gate = self.gate(name);
        let _guard = gate.lock().await;

        let changed = self.store.server(name).as_ref() != Some(&config);
        let result = self.store.add_or_update_server(name, config).await;
        if changed {
            // The old listing describes the old server.
            let _ = self.store.clear_tool_cache(name).await;
        }
        if let Some(client) = self.remove_cached(name) {
            tracing::info!(server = %name, "Configuration replaced, dropping cached client");
            client.disconnect().await;
            self.mark_stopped(name).await;
        }
        result
    }

    /// Tear down the server's connection, configuration, metadata and status.
    pub async fn remove_server(&self, name: &str) -> Result<bool, StoreError> {
        let gate = self.gate(name);
        let removed = {
            let _guard = gate.lock().await;
            if let Some(client) = self.remove_cached(name) {
                client.disconnect().await;
            }
            self.store.remove_server(name).await
        };
        // Only forget the gate when nobody else holds it: the map and `gate`
        // account for two references.
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        if gates.get(name).is_some_and(|g| Arc::strong_count(g) <= 2) {
            gates.remove(name);
        }
        removed
    }

    /// Toggle eligibility for future connects. A live client stays connected.
    pub async fn set_server_enabled(&self, name: &str, enabled: bool) -> Result<bool, StoreError> {
        self.store.set_server_enabled(name, enabled).await
    }

    /// Disconnect and evict the cached client. Returns whether one existed.
    pub async fn disconnect(&self, name: &str) -> bool {
        let gate = self.gate(name);
        let _guard = gate.lock().await;

        let Some(client) = self.remove_cached(name) else {
            return false;
        };
        client.disconnect().await;
        self.mark_stopped(name).await;
        true
    }

    /// Sorted names of servers with a cached client.
    pub fn cached_client_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Disconnect and clear every cached client.
    pub async fn shutdown(&self) {
        let clients: Vec<(String, Arc<dyn ToolTransport>)> =
            self.write_clients().drain().collect();
        for (name, client) in clients {
            client.disconnect().await;
            self.mark_stopped(&name).await;
        }
        tracing::debug!("Connection manager shut down");
    }

    fn gate(&self, name: &str) -> Gate {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(name.to_string()).or_default())
    }

    fn cached(&self, name: &str) -> Option<Arc<dyn ToolTransport>> {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn remove_cached(&self, name: &str) -> Option<Arc<dyn ToolTransport>> {
        self.write_clients().remove(name)
    }

    fn write_clients(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn ToolTransport>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn connect(&self, client: &Arc<dyn ToolTransport>) -> Result<(), McpError> {
        match tokio::time::timeout(self.connect_timeout, client.connect()).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                name: client.server_name().to_string(),
                timeout_ms: u64::try_from(self.connect_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    // Status writes below ignore persist errors; the store has already logged them.

    async fn mark_connected(&self, name: &str) {
        let _ = self.store.set_server_active(name, true).await;
    }

    async fn mark_stopped(&self, name: &str) {
        let _ = self.store.set_server_active(name, false).await;
    }

    async fn mark_failed(&self, name: &str, error: &McpError) {
        let message = error.to_string();
        let _ = self
            .store
            .update_server_status(name, |status| {
                status.active = false;
                status.error_message = Some(message);
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::BoxFuture;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use toolwire_types::{PluginMetadata, ToolInfo};

    /// Connects after a configurable delay; never fails.
    struct SlowTransport {
        name: String,
        delay: Duration,
        connected: AtomicBool,
    }

    impl ToolTransport for SlowTransport {
        fn server_name(&self) -> &str {
            &self.name
        }

        fn connect(&self) -> BoxFuture<'_, Result<(), McpError>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            })
        }

        fn disconnect(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move { self.connected.store(false, Ordering::SeqCst) })
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolInfo>, McpError>> {
            Box::pin(async { Ok(vec![]) })
        }

        fn call_tool<'a>(&'a self, _: &'a str, _: Value) -> BoxFuture<'a, Result<Value, McpError>> {
            Box::pin(async { Ok(Value::Null) })
        }
    }

    struct SlowFactory(Duration);

    impl TransportFactory for SlowFactory {
        fn create(
            &self,
            name: &str,
            _: &ServerConfig,
            _: Option<&PluginMetadata>,
        ) -> Result<Arc<dyn ToolTransport>, McpError> {
            Ok(Arc::new(SlowTransport {
                name: name.to_string(),
                delay: self.0,
                connected: AtomicBool::new(false),
            }))
        }
    }

    async fn manager(dir: &tempfile::TempDir, delay: Duration) -> ConnectionManager {
        let store = Arc::new(ConfigStore::open(dir.path()).await.unwrap());
        store
            .add_or_update_server("slow", ServerConfig::new("slow-server", vec![]))
            .await
            .unwrap();
        ConnectionManager::new(
            store,
            Arc::new(SlowFactory(delay)),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn connect_timeout_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::from_secs(5)).await;

        assert!(manager.get_or_create_client("slow").await.is_none());
        assert!(manager.cached_client_names().is_empty());

        let status = manager.store().server_status("slow").unwrap();
        assert!(!status.active);
        assert!(status.error_message.unwrap().contains("timed out after 50ms"));
    }

    #[tokio::test]
    async fn unknown_and_disabled_servers_get_no_client() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::ZERO).await;

        assert!(manager.get_or_create_client("missing").await.is_none());

        manager.set_server_enabled("slow", false).await.unwrap();
        assert!(manager.get_or_create_client("slow").await.is_none());

        manager.set_server_enabled("slow", true).await.unwrap();
        assert!(manager.get_or_create_client("slow").await.is_some());
        assert!(manager.store().server_status("slow").unwrap().active);
    }

    #[tokio::test]
    async fn removal_keeps_gate_that_callers_still_hold() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::ZERO).await;

        let held = manager.gate("slow");
        manager.remove_server("slow").await.unwrap();
        assert!(Arc::ptr_eq(&held, &manager.gate("slow")));

        drop(held);
        manager.remove_server("slow").await.unwrap();
        assert!(!manager.gates.lock().unwrap().contains_key("slow"));
    }

    #[tokio::test]
    async fn disabling_keeps_live_client() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir, Duration::ZERO).await;

        let first = manager.get_or_create_client("slow").await.unwrap();
        manager.set_server_enabled("slow", false).await.unwrap();
        assert!(first.is_connected());
        assert_eq!(manager.cached_client_names(), vec!["slow".to_string()]);

        assert!(manager.disconnect("slow").await);
        assert!(!manager.disconnect("slow").await);
        assert!(!first.is_connected());
        assert!(!manager.store().server_status("slow").unwrap().active);
    }
}
