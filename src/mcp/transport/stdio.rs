//! Newline-delimited JSON-RPC over a spawned peer's stdin/stdout.

use super::{
    encode_notification, encode_request, is_server_request, reply_to_server_request,
    route_server_value, NotificationSender, PeerTransport,
};
use crate::core::config::PeerConfig;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use rust_mcp_schema::RequestId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const STDIO_WRITE_TIMEOUT_SECONDS: u64 = 10;

type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub struct StdioTransport {
    peer_id: String,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    request_timeout: Duration,
    exited: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

pub fn require_stdio_command(config: &PeerConfig) -> Result<String, String> {
    config
        .command
        .clone()
        .ok_or_else(|| "MCP command is required for stdio transport.".to_string())
}

impl StdioTransport {
    /// Spawns the configured command and starts the reader tasks.
    pub fn spawn(config: &PeerConfig, notifications: NotificationSender) -> Result<Self, String> {
        let command = require_stdio_command(config)?;
        let args = config.args.clone().unwrap_or_default();
        debug!(peer_id = %config.id, command = %command, args = ?args, "Starting MCP stdio peer");
        let mut cmd = Command::new(&command);
        cmd.args(&args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = &config.env {
            cmd.envs(env);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| format!("Failed to start {command}: {err}"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let transport = Self {
            peer_id: config.id.clone(),
            stdin: Arc::new(Mutex::new(stdin)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicI64::new(0),
            request_timeout: Duration::from_secs(config.request_timeout_secs()),
            exited: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        };

        spawn_stdout_reader(
            transport.peer_id.clone(),
            stdout,
            Arc::clone(&transport.pending),
            Arc::clone(&transport.stdin),
            notifications,
        );
        spawn_stderr_drain(transport.peer_id.clone(), stderr);

        let peer_id = transport.peer_id.clone();
        let pending = Arc::clone(&transport.pending);
        let exited = Arc::clone(&transport.exited);
        let shutdown = transport.shutdown.clone();
        tokio::spawn(async move {
            let stop_requested = tokio::select! {
                _ = child.wait() => false,
                _ = shutdown.cancelled() => true,
            };
            if stop_requested {
                let _ = child.kill().await;
            }
            exited.store(true, Ordering::SeqCst);
            // Dropping the senders fails every waiting request.
            pending.lock().await.clear();
            debug!(peer_id = %peer_id, "MCP stdio peer exited");
        });

        Ok(transport)
    }
}

fn spawn_stdout_reader(
    peer_id: String,
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    stdin: Arc<Mutex<ChildStdin>>,
    notifications: NotificationSender,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            let value = match serde_json::from_str::<Value>(&line) {
                Ok(value) => value,
                Err(_) => {
                    debug!(peer_id = %peer_id, "Skipping non-JSON stdout line from MCP peer");
                    continue;
                }
            };
            let frames = match value {
                Value::Array(items) => items,
                other => vec![other],
            };
            for frame in frames {
                if is_server_request(&frame) {
                    if let Some(reply) = reply_to_server_request(&frame) {
                        let _ = write_frame(stdin.as_ref(), &reply.to_string()).await;
                    }
                    continue;
                }
                if let Some(message) = route_server_value(&peer_id, frame, &notifications) {
                    dispatch_response(&peer_id, &pending, message).await;
                }
            }
        }
    });
}

fn spawn_stderr_drain(peer_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!(peer_id = %peer_id, line = %line, "MCP stdio peer stderr");
        }
    });
}

async fn dispatch_response(peer_id: &str, pending: &PendingMap, message: ServerMessage) {
    let request_id = match &message {
        ServerMessage::Response(response) => Some(response.id.clone()),
        ServerMessage::Error(error) => error.id.clone(),
        _ => None,
    };
    let Some(request_id) = request_id else {
        debug!(peer_id = %peer_id, "Ignoring uncorrelated MCP stdio message");
        return;
    };
    debug!(peer_id = %peer_id, request_id = ?request_id, "Received MCP stdio response");
    if let Some(tx) = pending.lock().await.remove(&request_id) {
        let _ = tx.send(message);
    }
}

async fn write_frame<W>(stdin: &Mutex<W>, payload: &str) -> Result<(), String>
where
    W: AsyncWrite + Unpin,
{
    let write_timeout = Duration::from_secs(STDIO_WRITE_TIMEOUT_SECONDS);
    let mut stdin = tokio::time::timeout(write_timeout, stdin.lock())
        .await
        .map_err(|_| "Timed out waiting for MCP stdio stdin lock.".to_string())?;
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload.as_bytes());
    frame.push(b'\n');
    tokio::time::timeout(write_timeout, stdin.write_all(&frame))
        .await
        .map_err(|_| "Timed out writing MCP stdio request.".to_string())?
        .map_err(|err| err.to_string())?;
    tokio::time::timeout(write_timeout, stdin.flush())
        .await
        .map_err(|_| "Timed out flushing MCP stdio request.".to_string())?
        .map_err(|err| err.to_string())
}

/// Inserts a pending entry unless the peer is already gone.
///
/// The exit watcher sets `exited` before it clears the map, so checking the
/// flag under the map lock means an entry is either refused here or dropped
/// by that clear.
async fn register_pending(
    pending: &PendingMap,
    exited: &AtomicBool,
    request_id: RequestId,
) -> Result<oneshot::Receiver<ServerMessage>, String> {
    let mut pending = pending.lock().await;
    if exited.load(Ordering::SeqCst) {
        return Err("MCP stdio peer has exited.".to_string());
    }
    let (tx, rx) = oneshot::channel();
    pending.insert(request_id, tx);
    Ok(rx)
}

/// Removes a pending entry when its request finishes, times out or is dropped.
struct PendingGuard {
    pending: PendingMap,
    request_id: Option<RequestId>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let Some(request_id) = self.request_id.take() else {
            return;
        };
        if let Ok(mut pending) = self.pending.try_lock() {
            pending.remove(&request_id);
            return;
        }
        let pending = Arc::clone(&self.pending);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                pending.lock().await.remove(&request_id);
            });
        }
    }
}

#[async_trait]
impl PeerTransport for StdioTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        if self.exited.load(Ordering::SeqCst) {
            return Err("MCP stdio peer has exited.".to_string());
        }
        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let request_id = RequestId::Integer(id);
        let payload = serde_json::to_string(&encode_request(id, request)?)
            .map_err(|err| err.to_string())?;

        let rx = register_pending(&self.pending, &self.exited, request_id.clone()).await?;
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            request_id: Some(request_id.clone()),
        };

        debug!(peer_id = %self.peer_id, request_id = ?request_id, "Sending MCP stdio request");
        write_frame(self.stdin.as_ref(), &payload).await?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err("MCP stdio peer closed the connection.".to_string()),
            Err(_) => {
                debug!(peer_id = %self.peer_id, request_id = ?request_id, "MCP stdio request timed out");
                Err(format!(
                    "MCP stdio request timed out after {}s.",
                    self.request_timeout.as_secs()
                ))
            }
        }
    }

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), String> {
        if self.exited.load(Ordering::SeqCst) {
            return Err("MCP stdio peer has exited.".to_string());
        }
        let payload = serde_json::to_string(&encode_notification(notification)?)
            .map_err(|err| err.to_string())?;
        write_frame(self.stdin.as_ref(), &payload).await
    }

    async fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn stdio_requires_command() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = PeerConfig {
            id: "users".to_string(),
            transport: Some("stdio".to_string()),
            ..PeerConfig::default()
        };
        let err = StdioTransport::spawn(&config, tx)
            .err()
            .expect("command is required");
        assert_eq!(err, "MCP command is required for stdio transport.");
    }

    #[tokio::test]
    async fn missing_executable_fails_to_spawn() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = PeerConfig {
            id: "users".to_string(),
            transport: Some("stdio".to_string()),
            command: Some("/definitely-missing-command".to_string()),
            ..PeerConfig::default()
        };
        let err = StdioTransport::spawn(&config, tx)
            .err()
            .expect("spawn should fail");
        assert!(err.starts_with("Failed to start /definitely-missing-command"));
    }

    #[tokio::test]
    async fn frames_end_with_newline() {
        let (client, mut server) = tokio::io::duplex(256);
        let writer = Mutex::new(client);
        write_frame(&writer, "{\"jsonrpc\":\"2.0\"}")
            .await
            .expect("write should succeed");

        let mut line = String::new();
        let mut reader = BufReader::new(&mut server);
        reader.read_line(&mut line).await.expect("read line");
        assert_eq!(line, "{\"jsonrpc\":\"2.0\"}\n");
    }

    #[tokio::test]
    async fn dropped_guard_clears_pending_entry() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();
        pending.lock().await.insert(RequestId::Integer(3), tx);
        drop(PendingGuard {
            pending: Arc::clone(&pending),
            request_id: Some(RequestId::Integer(3)),
        });
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn requests_are_refused_once_the_peer_has_exited() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let exited = AtomicBool::new(false);

        let rx = register_pending(&pending, &exited, RequestId::Integer(1))
            .await
            .expect("live peer accepts requests");
        exited.store(true, Ordering::SeqCst);
        pending.lock().await.clear();
        assert!(rx.await.is_err());

        let err = register_pending(&pending, &exited, RequestId::Integer(2))
            .await
            .expect_err("exited peer refuses requests");
        assert_eq!(err, "MCP stdio peer has exited.");
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn responses_resolve_matching_request() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(RequestId::Integer(7), tx);

        let message: ServerMessage = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "result": {"ok": true}
        }))
        .expect("response should parse");
        dispatch_response("users", &pending, message).await;

        assert!(matches!(rx.await, Ok(ServerMessage::Response(_))));
        assert!(pending.lock().await.is_empty());
    }
}
