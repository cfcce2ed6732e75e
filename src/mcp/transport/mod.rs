//! Shared MCP transport abstractions.
//!
//! Implementations normalize stdio pipes, streamable HTTP and in-process
//! servers behind [`PeerTransport`]. Every method takes `&self`, so one
//! connection carries any number of concurrent requests. Responses are
//! correlated by request id, and server-initiated `list_changed`
//! notifications are forwarded to the [`NotificationSender`] handed over
//! at construction.

use crate::core::config::PeerConfig;
use crate::mcp::events::{notification_from_value, PeerNotification};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::{RequestId, RpcError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

pub mod in_process;
pub mod stdio;
pub mod streamable_http;

/// JSON-RPC code used by servers to indicate unsupported methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;
pub const MCP_INVALID_PARAMS: i64 = -32602;
pub const MCP_INTERNAL_ERROR: i64 = -32603;
pub const MCP_RESOURCE_NOT_FOUND: i64 = -32002;

/// Where transports deliver `list_changed` notifications.
pub type NotificationSender = mpsc::UnboundedSender<PeerNotification>;

#[async_trait]
/// Request/response plus push channel to one peer.
pub trait PeerTransport: Send + Sync {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String>;

    async fn send_notification(&self, notification: NotificationFromClient)
        -> Result<(), String>;

    /// Called after the initialize handshake with the negotiated version.
    async fn on_initialized(&self, _protocol_version: &str) -> Result<(), String> {
        Ok(())
    }

    /// Stops background listeners and releases the connection.
    async fn close(&self) {}
}

/// Supported MCP transport backends.
///
/// - [`McpTransportKind::Stdio`] for locally spawned processes.
/// - [`McpTransportKind::StreamableHttp`] for remote servers over HTTP/SSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransportKind {
    StreamableHttp,
    Stdio,
}

impl McpTransportKind {
    /// Resolves transport type from config, defaulting to streamable HTTP.
    pub fn from_config(config: &PeerConfig) -> Result<Self, String> {
        let transport = config
            .transport
            .as_deref()
            .unwrap_or("streamable-http")
            .to_ascii_lowercase();
        match transport.as_str() {
            "streamable-http" | "streamable_http" | "http" => Ok(McpTransportKind::StreamableHttp),
            "stdio" => Ok(McpTransportKind::Stdio),
            other => Err(format!("Unsupported MCP transport: {}", other)),
        }
    }
}

/// Builds the transport named in the peer's configuration.
pub fn connect_transport(
    config: &PeerConfig,
    notifications: NotificationSender,
) -> Result<Arc<dyn PeerTransport>, String> {
    match McpTransportKind::from_config(config)? {
        McpTransportKind::Stdio => Ok(Arc::new(stdio::StdioTransport::spawn(
            config,
            notifications,
        )?)),
        McpTransportKind::StreamableHttp => Ok(Arc::new(
            streamable_http::StreamableHttpTransport::new(config, notifications)?,
        )),
    }
}

pub fn encode_request(request_id: i64, request: RequestFromClient) -> Result<ClientMessage, String> {
    ClientMessage::from_message(
        MessageFromClient::RequestFromClient(request),
        Some(RequestId::Integer(request_id)),
    )
    .map_err(|err| err.to_string())
}

pub fn encode_notification(notification: NotificationFromClient) -> Result<ClientMessage, String> {
    ClientMessage::from_message(MessageFromClient::NotificationFromClient(notification), None)
        .map_err(|err| err.to_string())
}

/// Returns true when a server reports the JSON-RPC method-not-found code.
pub fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}

pub fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    if let Some(data) = &error.data {
        let details = data
            .get("details")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .or_else(|| data.as_str().map(|value| value.to_string()))
            .or_else(|| serde_json::to_string_pretty(data).ok());

        if let Some(details) = details {
            if !details.is_empty() {
                output.push('\n');
                output.push_str(&details);
            }
        }
    }
    output
}

/// Routes one decoded frame from a peer.
///
/// `list_changed` notifications go to `notifications` and yield `None`;
/// anything else that parses is returned for correlation.
pub(crate) fn route_server_value(
    peer_id: &str,
    value: Value,
    notifications: &NotificationSender,
) -> Option<ServerMessage> {
    if let Some(notification) = notification_from_value(peer_id, &value) {
        debug!(
            peer_id = %peer_id,
            kind = %notification.kind,
            detailed = notification.detail.is_some(),
            "Received MCP list_changed notification"
        );
        let _ = notifications.send(notification);
        return None;
    }
    match serde_json::from_value::<ServerMessage>(value) {
        Ok(message) => Some(message),
        Err(err) => {
            debug!(peer_id = %peer_id, error = %err, "Ignoring undecodable MCP frame");
            None
        }
    }
}

/// Answer for a request the server sends us: `ping` succeeds, the rest is unsupported.
pub(crate) fn reply_to_server_request(request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let method = request.get("method")?.as_str()?;
    Some(if method == "ping" {
        serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {}})
    } else {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": MCP_METHOD_NOT_FOUND,
                "message": format!("Method not supported by client: {method}"),
            }
        })
    })
}

pub(crate) fn is_server_request(value: &Value) -> bool {
    value.get("id").is_some() && value.get("method").is_some()
}
