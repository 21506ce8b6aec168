//! Child-process pipe speaking newline-delimited JSON-RPC.
//!
//! A writer task drains an mpsc channel into the child's stdin; a reader task
//! parses stdout lines and completes the matching pending request.

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Grace period for a child to exit after its stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub(crate) struct StdioProcess {
    next_id: AtomicU64,
    write_tx: mpsc::Sender<String>,
    pending: PendingMap,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    child: Arc<Mutex<Child>>,
    timeout_ms: u64,
}

impl StdioProcess {
    /// Spawn the child and start the reader/writer tasks.
    pub(crate) fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout_ms: u64,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::SpawnFailed {
                name: command.to_string(),
                source: e,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(McpError::Protocol(format!(
                "'{command}' started without piped stdio"
            )));
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(mut msg) = write_rx.recv().await {
                msg.push('\n');
                if stdin.write_all(msg.as_bytes()).await.is_err() || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let pending_for_reader = Arc::clone(&pending);
        let reader_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                let resp: JsonRpcResponse = match serde_json::from_str(&line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!("Ignoring non-JSON-RPC line from tool server: {e}");
                        continue;
                    }
                };
                // Server-initiated notifications carry no id.
                if let Some(id) = resp.id {
                    if let Some(tx) = pending_for_reader.lock().await.remove(&id) {
                        let _ = tx.send(resp);
                    }
                }
            }
            // Fail everything still waiting so callers don't sit out the timeout.
            pending_for_reader.lock().await.clear();
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            write_tx,
            pending,
            reader_handle,
            writer_handle,
            child: Arc::new(Mutex::new(child)),
            timeout_ms,
        })
    }

    /// False once the child's stdout has closed.
    pub(crate) fn is_alive(&self) -> bool {
        !self.reader_handle.is_finished() && !self.write_tx.is_closed()
    }

    /// Send a request and wait for its response.
    pub(crate) async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let serialized = serde_json::to_string(&JsonRpcRequest::request(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.write_tx.send(serialized).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpError::Protocol("Writer channel closed".to_string()));
        }

        match tokio::time::timeout(Duration::from_millis(self.timeout_ms), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(_)) => Err(McpError::Protocol(format!(
                "Tool server exited before answering '{method}'"
            ))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    name: method.to_string(),
                    timeout_ms: self.timeout_ms,
                })
            }
        }
    }

    /// Send a notification; no response is expected.
    pub(crate) async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        let serialized = serde_json::to_string(&JsonRpcRequest::notification(method, params))?;
        self.write_tx
            .send(serialized)
            .await
            .map_err(|_| McpError::Protocol("Writer channel closed".to_string()))
    }

    /// Close stdin, give the child a grace period, then kill it.
    pub(crate) async fn shutdown(self) {
        drop(self.write_tx);

        let child = self.child;
        let graceful = tokio::time::timeout(SHUTDOWN_GRACE, async {
            let _ = child.lock().await.wait().await;
        })
        .await;

        if graceful.is_err() {
            let _ = child.lock().await.kill().await;
        }

        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
