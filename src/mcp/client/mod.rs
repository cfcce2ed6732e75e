//! Invocation client for one MCP peer.
//!
//! [`McpPeer`] owns the transport after the initialize handshake and turns
//! the raw protocol into bridge types. Failures to reach the peer become
//! [`BridgeError::Connectivity`]; failures the peer reports about a call
//! become error-flagged results.

use crate::core::config::PeerConfig;
use crate::mcp::capability::{CapabilityDescriptor, CapabilityKind};
use crate::mcp::content::{InvocationResult, PromptResult};
use crate::mcp::error::BridgeError;
use crate::mcp::events::PeerNotification;
use crate::mcp::registry::CapabilitySource;
use crate::mcp::server::McpServer;
use crate::mcp::transport::in_process::InProcessTransport;
use crate::mcp::transport::{connect_transport, format_rpc_error, is_method_not_found, PeerTransport};
use crate::mcp::value::{arguments_to_json, Arguments};
use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient};
use rust_mcp_schema::{
    CallToolRequestParams, GetPromptRequestParams, ReadResourceRequestParams,
    LATEST_PROTOCOL_VERSION,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

mod protocol;

pub use protocol::ServerDetails;
use protocol::{
    classify, client_details, list_field, list_request, parse_initialize_result,
    parse_response_value, requested_protocol_version, Reply,
};

/// Upper bound on entries kept per capability kind.
pub const MCP_MAX_LIST_ENTRIES: usize = 100;
const MCP_MAX_LIST_PAGES: usize = 20;

/// An initialized connection to one peer. Safe to share behind an `Arc`;
/// every method takes `&self`.
pub struct McpPeer {
    id: String,
    display_name: String,
    transport: Arc<dyn PeerTransport>,
    details: ServerDetails,
}

impl std::fmt::Debug for McpPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpPeer")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("details", &self.details)
            .finish()
    }
}

impl McpPeer {
    /// Connects to the configured peer and performs the handshake.
    ///
    /// The returned receiver yields the peer's `list_changed` notifications;
    /// hand it to [`crate::mcp::bridge::McpBridge::spawn_subscriber`].
    pub async fn connect(
        config: &PeerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerNotification>), BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport =
            connect_transport(config, tx).map_err(|err| BridgeError::connectivity(&config.id, err))?;
        let display_name = if config.display_name.trim().is_empty() {
            config.id.clone()
        } else {
            config.display_name.clone()
        };
        let peer = Self::initialize(
            &config.id,
            &display_name,
            transport,
            requested_protocol_version(config),
        )
        .await?;
        Ok((peer, rx))
    }

    /// Connects to a server running in this process.
    pub async fn connect_in_process(
        peer_id: &str,
        server: McpServer,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerNotification>), BridgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let display_name = server.name().to_string();
        let transport: Arc<dyn PeerTransport> =
            Arc::new(InProcessTransport::connect(peer_id, server, tx).await);
        let peer = Self::initialize(
            peer_id,
            &display_name,
            transport,
            LATEST_PROTOCOL_VERSION.to_string(),
        )
        .await?;
        Ok((peer, rx))
    }

    async fn initialize(
        peer_id: &str,
        display_name: &str,
        transport: Arc<dyn PeerTransport>,
        protocol_version: String,
    ) -> Result<Self, BridgeError> {
        match handshake(transport.as_ref(), protocol_version).await {
            Ok(details) => {
                debug!(
                    peer_id = %peer_id,
                    server = %details.name,
                    protocol_version = %details.protocol_version,
                    "MCP peer initialized"
                );
                Ok(Self {
                    id: peer_id.to_string(),
                    display_name: display_name.to_string(),
                    transport,
                    details,
                })
            }
            Err(err) => {
                transport.close().await;
                Err(BridgeError::connectivity(peer_id, err))
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn details(&self) -> &ServerDetails {
        &self.details
    }

    fn connectivity(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::connectivity(&self.id, message)
    }

    async fn request(&self, request: RequestFromClient) -> Result<Reply, BridgeError> {
        let message = self
            .transport
            .send_request(request)
            .await
            .map_err(|err| self.connectivity(err))?;
        classify(message).map_err(|err| self.connectivity(err))
    }

    pub async fn list_tools(&self) -> Result<Vec<CapabilityDescriptor>, BridgeError> {
        self.list(CapabilityKind::Tool).await
    }

    pub async fn list_resources(&self) -> Result<Vec<CapabilityDescriptor>, BridgeError> {
        self.list(CapabilityKind::Resource).await
    }

    pub async fn list_prompts(&self) -> Result<Vec<CapabilityDescriptor>, BridgeError> {
        self.list(CapabilityKind::Prompt).await
    }

    /// Fetches every advertised entry of one kind, following `nextCursor`.
    ///
    /// A peer that does not advertise the capability, or answers the list
    /// method with method-not-found, has nothing of that kind.
    pub async fn list(&self, kind: CapabilityKind) -> Result<Vec<CapabilityDescriptor>, BridgeError> {
        if !self.details.supports(kind) {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MCP_MAX_LIST_PAGES {
            let message = self
                .transport
                .send_request(list_request(kind, cursor.take()))
                .await
                .map_err(|err| self.connectivity(err))?;
            if is_method_not_found(&message) {
                debug!(peer_id = %self.id, kind = %kind, "MCP peer does not list this kind");
                return Ok(Vec::new());
            }
            let page = parse_response_value(message).map_err(|err| self.connectivity(err))?;
            let items = page
                .get(list_field(kind))
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    self.connectivity(format!("Unexpected {} response.", kind.list_method()))
                })?;
            for item in items {
                let descriptor = match kind {
                    CapabilityKind::Tool => CapabilityDescriptor::from_tool_value(item),
                    CapabilityKind::Resource => CapabilityDescriptor::from_resource_value(item),
                    CapabilityKind::Prompt => CapabilityDescriptor::from_prompt_value(item),
                }
                .map_err(|err| self.connectivity(err))?;
                entries.push(descriptor);
            }

            if entries.len() >= MCP_MAX_LIST_ENTRIES {
                entries.truncate(MCP_MAX_LIST_ENTRIES);
                break;
            }
            match page.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(peer_id = %self.id, kind = %kind, entries = entries.len(), "Listed MCP capabilities");
        Ok(entries)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Arguments,
    ) -> Result<InvocationResult, BridgeError> {
        let mut params = CallToolRequestParams::new(name);
        if !arguments.is_empty() {
            params = params.with_arguments(arguments_to_json(arguments));
        }
        match self.request(RequestFromClient::CallToolRequest(params)).await? {
            Reply::Result(value) => {
                InvocationResult::from_call_tool_value(&value).map_err(|err| self.connectivity(err))
            }
            Reply::Rejected(error) => Ok(InvocationResult::error(format_rpc_error(&error))),
        }
    }

    pub async fn read_resource(&self, uri: &str) -> Result<InvocationResult, BridgeError> {
        let params = ReadResourceRequestParams {
            meta: None,
            uri: uri.to_string(),
        };
        match self.request(RequestFromClient::ReadResourceRequest(params)).await? {
            Reply::Result(value) => InvocationResult::from_read_resource_value(&value)
                .map_err(|err| self.connectivity(err)),
            Reply::Rejected(error) => Ok(InvocationResult::error(format_rpc_error(&error))),
        }
    }

    /// Asks the peer to render a prompt. Arguments travel as strings.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &Arguments,
    ) -> Result<PromptResult, BridgeError> {
        let rendered: HashMap<String, String> = arguments
            .iter()
            .map(|(key, value)| (key.clone(), value.render_as_prompt_arg()))
            .collect();
        let params = GetPromptRequestParams {
            name: name.to_string(),
            arguments: (!rendered.is_empty()).then_some(rendered),
            meta: None,
        };
        match self.request(RequestFromClient::GetPromptRequest(params)).await? {
            Reply::Result(value) => {
                PromptResult::from_get_prompt_value(&value).map_err(|err| self.connectivity(err))
            }
            Reply::Rejected(error) => Ok(PromptResult::error(format_rpc_error(&error))),
        }
    }

    pub async fn ping(&self) -> Result<(), BridgeError> {
        match self.request(RequestFromClient::PingRequest(None)).await? {
            Reply::Result(_) => Ok(()),
            Reply::Rejected(error) => Err(self.connectivity(format_rpc_error(&error))),
        }
    }

    /// Stops background listeners. The handle should not be used afterwards.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}

#[async_trait]
impl CapabilitySource for McpPeer {
    fn peer_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self, kind: CapabilityKind) -> Result<Vec<CapabilityDescriptor>, BridgeError> {
        self.list(kind).await
    }
}

async fn handshake(
    transport: &dyn PeerTransport,
    protocol_version: String,
) -> Result<ServerDetails, String> {
    let message = transport
        .send_request(RequestFromClient::InitializeRequest(client_details(
            protocol_version,
        )))
        .await?;
    let details = parse_initialize_result(message)?;
    transport
        .send_notification(NotificationFromClient::InitializedNotification(None))
        .await?;
    transport.on_initialized(&details.protocol_version).await?;
    Ok(details)
}
