//! Connects a client directly to an [`McpServer`] in the same process.
//!
//! Frames still go through JSON encoding so the client exercises the same
//! parsing paths as it does over stdio or HTTP.

use super::{
    encode_notification, encode_request, route_server_value, NotificationSender, PeerTransport,
};
use crate::mcp::server::McpServer;
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use std::sync::atomic::{AtomicI64, Ordering};
use tokio_util::sync::CancellationToken;

pub struct InProcessTransport {
    server: McpServer,
    next_request_id: AtomicI64,
    forwarder: CancellationToken,
}

impl InProcessTransport {
    /// Attaches to `server` and forwards its `list_changed` notifications.
    pub async fn connect(peer_id: &str, server: McpServer, notifications: NotificationSender) -> Self {
        let mut session = server.attach_session().await;
        let forwarder = CancellationToken::new();
        let cancel = forwarder.clone();
        let peer_id = peer_id.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = session.recv() => match frame {
                        Some(frame) => {
                            let _ = route_server_value(&peer_id, frame, &notifications);
                        }
                        None => break,
                    },
                }
            }
        });

        Self {
            server,
            next_request_id: AtomicI64::new(0),
            forwarder,
        }
    }
}

#[async_trait]
impl PeerTransport for InProcessTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let message = encode_request(request_id, request)?;
        let frame = serde_json::to_value(&message).map_err(|err| err.to_string())?;
        let reply = self
            .server
            .handle_message(frame)
            .await
            .ok_or_else(|| "MCP server sent no reply.".to_string())?;
        serde_json::from_value::<ServerMessage>(reply).map_err(|err| err.to_string())
    }

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), String> {
        let message = encode_notification(notification)?;
        let frame = serde_json::to_value(&message).map_err(|err| err.to_string())?;
        self.server.handle_message(frame).await;
        Ok(())
    }

    async fn close(&self) {
        self.forwarder.cancel();
    }
}

impl Drop for InProcessTransport {
    fn drop(&mut self) {
        self.forwarder.cancel();
    }
}
