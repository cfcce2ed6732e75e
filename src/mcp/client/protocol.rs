use crate::core::config::PeerConfig;
use crate::mcp::capability::CapabilityKind;
use crate::mcp::transport::format_rpc_error;
use rust_mcp_schema::schema_utils::{RequestFromClient, ServerMessage};
use rust_mcp_schema::{
    ClientCapabilities, Implementation, InitializeRequestParams, InitializeResult,
    PaginatedRequestParams, RpcError, LATEST_PROTOCOL_VERSION,
};
use serde_json::Value;

/// What the peer told us about itself during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDetails {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
    pub instructions: Option<String>,
    pub supports_tools: bool,
    pub supports_resources: bool,
    pub supports_prompts: bool,
}

impl ServerDetails {
    pub fn supports(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::Tool => self.supports_tools,
            CapabilityKind::Resource => self.supports_resources,
            CapabilityKind::Prompt => self.supports_prompts,
        }
    }
}

impl From<InitializeResult> for ServerDetails {
    fn from(result: InitializeResult) -> Self {
        Self {
            name: result.server_info.name,
            version: result.server_info.version,
            protocol_version: result.protocol_version,
            instructions: result.instructions,
            supports_tools: result.capabilities.tools.is_some(),
            supports_resources: result.capabilities.resources.is_some(),
            supports_prompts: result.capabilities.prompts.is_some(),
        }
    }
}

/// A reply that reached us intact: either a result or a JSON-RPC error.
pub(crate) enum Reply {
    Result(Value),
    Rejected(RpcError),
}

pub(crate) fn requested_protocol_version(config: &PeerConfig) -> String {
    config
        .protocol_version
        .clone()
        .filter(|version| !version.trim().is_empty())
        .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string())
}

pub(crate) fn client_details(protocol_version: String) -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "passerelle".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Passerelle MCP Bridge".to_string()),
            description: Some("Discovers, invokes and watches MCP capabilities".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version,
    }
}

pub(crate) fn list_request(kind: CapabilityKind, cursor: Option<String>) -> RequestFromClient {
    let params = cursor.map(|cursor| PaginatedRequestParams {
        cursor: Some(cursor),
        meta: None,
    });
    match kind {
        CapabilityKind::Tool => RequestFromClient::ListToolsRequest(params),
        CapabilityKind::Resource => RequestFromClient::ListResourcesRequest(params),
        CapabilityKind::Prompt => RequestFromClient::ListPromptsRequest(params),
    }
}

pub(crate) fn list_field(kind: CapabilityKind) -> &'static str {
    match kind {
        CapabilityKind::Tool => "tools",
        CapabilityKind::Resource => "resources",
        CapabilityKind::Prompt => "prompts",
    }
}

pub(crate) fn classify(message: ServerMessage) -> Result<Reply, String> {
    match message {
        ServerMessage::Response(response) => serde_json::to_value(&response.result)
            .map(Reply::Result)
            .map_err(|err| err.to_string()),
        ServerMessage::Error(error) => Ok(Reply::Rejected(error.error)),
        other => Err(format!("Unexpected MCP server message: {other:?}")),
    }
}

pub(crate) fn parse_response_value(message: ServerMessage) -> Result<Value, String> {
    match classify(message)? {
        Reply::Result(value) => Ok(value),
        Reply::Rejected(error) => Err(format_rpc_error(&error)),
    }
}

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<ServerDetails, String> {
    let value = parse_response_value(message)?;
    let result =
        serde_json::from_value::<InitializeResult>(value).map_err(|err| err.to_string())?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result.into())
}
