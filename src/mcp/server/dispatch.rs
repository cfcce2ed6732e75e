//! JSON-RPC method dispatch for [`McpServer`].

use super::{McpServer, ResourceBody};
use crate::mcp::capability::{CapabilityDescriptor, CapabilityKind};
use crate::mcp::content::{InvocationResult, PromptResult};
use crate::mcp::transport::{
    MCP_INTERNAL_ERROR, MCP_INVALID_PARAMS, MCP_METHOD_NOT_FOUND, MCP_RESOURCE_NOT_FOUND,
};
use crate::mcp::value::{arguments_from_json, ArgumentValue, Arguments};
use base64::Engine;
use rust_mcp_schema::LATEST_PROTOCOL_VERSION;
use serde_json::{json, Map, Value};
use tracing::debug;

const MCP_PARSE_ERROR: i64 = -32700;
const MCP_INVALID_REQUEST: i64 = -32600;
const SUPPORTED_PROTOCOL_VERSIONS: [&str; 4] =
    [LATEST_PROTOCOL_VERSION, "2025-06-18", "2025-03-26", "2024-11-05"];

struct RpcFailure {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcFailure {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

type RpcResult = Result<Value, RpcFailure>;

pub(super) fn parse_error_response(detail: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": {"code": MCP_PARSE_ERROR, "message": "Parse error", "data": detail},
    })
}

fn response(id: Value, outcome: RpcResult) -> Value {
    match outcome {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(failure) => {
            let mut error = json!({"code": failure.code, "message": failure.message});
            if let (Some(data), Some(object)) = (failure.data, error.as_object_mut()) {
                object.insert("data".to_string(), data);
            }
            json!({"jsonrpc": "2.0", "id": id, "error": error})
        }
    }
}

impl McpServer {
    /// Handles one decoded JSON-RPC frame (or batch) and returns the reply,
    /// if the frame calls for one.
    pub async fn handle_message(&self, message: Value) -> Option<Value> {
        match message {
            Value::Array(frames) => {
                let mut replies = Vec::new();
                for frame in frames {
                    if let Some(reply) = self.handle_frame(frame).await {
                        replies.push(reply);
                    }
                }
                (!replies.is_empty()).then_some(Value::Array(replies))
            }
            frame => self.handle_frame(frame).await,
        }
    }

    async fn handle_frame(&self, frame: Value) -> Option<Value> {
        let id = frame.get("id").cloned();
        let Some(method) = frame.get("method").and_then(Value::as_str) else {
            // Replies to requests we never send are dropped.
            return id
                .filter(|_| frame.get("result").is_none() && frame.get("error").is_none())
                .map(|id| {
                    response(
                        id,
                        Err(RpcFailure::new(MCP_INVALID_REQUEST, "Invalid request")),
                    )
                });
        };
        let params = frame.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = id else {
            debug!(server = %self.inner.name, method = %method, "Received MCP notification");
            return None;
        };

        debug!(server = %self.inner.name, method = %method, request_id = %id, "Handling MCP request");
        let outcome = match method {
            "initialize" => Ok(self.initialize(&params)),
            "ping" => Ok(json!({})),
            "tools/list" => self.list(CapabilityKind::Tool, &params).await,
            "resources/list" => self.list(CapabilityKind::Resource, &params).await,
            "prompts/list" => self.list(CapabilityKind::Prompt, &params).await,
            "tools/call" => self.call_tool(&params).await,
            "resources/read" => self.read_resource(&params).await,
            "prompts/get" => self.get_prompt(&params).await,
            other => Err(RpcFailure::new(
                MCP_METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            )),
        };
        Some(response(id, outcome))
    }

    fn initialize(&self, params: &Value) -> Value {
        let requested = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let protocol_version = if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested) {
            requested
        } else {
            LATEST_PROTOCOL_VERSION
        };
        if let Some(client) = params.pointer("/clientInfo/name").and_then(Value::as_str) {
            debug!(server = %self.inner.name, client = %client, "MCP client initializing");
        }

        let mut result = json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": {"listChanged": true},
                "resources": {"listChanged": true, "subscribe": false},
                "prompts": {"listChanged": true},
            },
            "serverInfo": {"name": self.inner.name, "version": self.inner.version},
        });
        if let (Some(instructions), Some(object)) =
            (&self.inner.instructions, result.as_object_mut())
        {
            object.insert("instructions".to_string(), json!(instructions));
        }
        result
    }

    async fn list(&self, kind: CapabilityKind, params: &Value) -> RpcResult {
        let offset = match params.get("cursor").and_then(Value::as_str) {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| RpcFailure::new(MCP_INVALID_PARAMS, "Invalid cursor"))?,
            None => 0,
        };
        let descriptors = self.descriptors(kind).await;
        if offset > descriptors.len() {
            return Err(RpcFailure::new(MCP_INVALID_PARAMS, "Invalid cursor"));
        }
        let end = descriptors
            .len()
            .min(offset.saturating_add(self.inner.page_size));
        let page: Vec<Value> = descriptors
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(CapabilityDescriptor::to_list_entry)
            .collect();

        let field = match kind {
            CapabilityKind::Tool => "tools",
            CapabilityKind::Resource => "resources",
            CapabilityKind::Prompt => "prompts",
        };
        let mut result = Map::new();
        result.insert(field.to_string(), Value::Array(page));
        if end < descriptors.len() {
            result.insert("nextCursor".to_string(), json!(end.to_string()));
        }
        Ok(Value::Object(result))
    }

    async fn call_tool(&self, params: &Value) -> RpcResult {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcFailure::new(MCP_INVALID_PARAMS, "Missing tool name"))?;
        let arguments = arguments_from_json(params.get("arguments"));

        let entry = {
            let registry = self.inner.registry.read().await;
            registry
                .tools
                .iter()
                .find(|entry| entry.descriptor.name == name)
                .map(|entry| (entry.descriptor.clone(), entry.handler.clone()))
        };
        let Some((descriptor, handler)) = entry else {
            return Ok(InvocationResult::error(format!("Unknown tool: {name}")).to_call_tool_value());
        };

        let missing = missing_required(&descriptor, &arguments);
        if !missing.is_empty() {
            return Ok(InvocationResult::error(format!(
                "Missing required argument(s) for {name}: {}",
                missing.join(", ")
            ))
            .to_call_tool_value());
        }

        Ok(handler(arguments).await.to_call_tool_value())
    }

    async fn read_resource(&self, params: &Value) -> RpcResult {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcFailure::new(MCP_INVALID_PARAMS, "Missing resource uri"))?;

        let entry = {
            let registry = self.inner.registry.read().await;
            registry
                .resources
                .iter()
                .find(|entry| entry.descriptor.key() == uri)
                .map(|entry| (entry.descriptor.clone(), entry.handler.clone()))
        };
        let Some((descriptor, handler)) = entry else {
            return Err(RpcFailure::new(MCP_RESOURCE_NOT_FOUND, "Resource not found")
                .with_data(json!({"uri": uri})));
        };

        let body = handler()
            .await
            .map_err(|message| RpcFailure::new(MCP_INTERNAL_ERROR, message))?;
        let mut contents = json!({"uri": uri});
        if let Some(object) = contents.as_object_mut() {
            if let Some(mime_type) = &descriptor.mime_type {
                object.insert("mimeType".to_string(), json!(mime_type));
            }
            match body {
                ResourceBody::Text(text) => {
                    object.insert("text".to_string(), json!(text));
                }
                ResourceBody::Blob(bytes) => {
                    let blob = base64::engine::general_purpose::STANDARD.encode(bytes);
                    object.insert("blob".to_string(), json!(blob));
                }
            }
        }
        Ok(json!({"contents": [contents]}))
    }

    async fn get_prompt(&self, params: &Value) -> RpcResult {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcFailure::new(MCP_INVALID_PARAMS, "Missing prompt name"))?;
        // Prompt arguments arrive as strings; keep them that way for handlers.
        let arguments: Arguments = arguments_from_json(params.get("arguments"))
            .into_iter()
            .map(|(key, value)| match value {
                ArgumentValue::String(_) => (key, value),
                other => (key, ArgumentValue::String(other.render_as_prompt_arg())),
            })
            .collect();

        let entry = {
            let registry = self.inner.registry.read().await;
            registry
                .prompts
                .iter()
                .find(|entry| entry.descriptor.name == name)
                .map(|entry| (entry.descriptor.clone(), entry.handler.clone()))
        };
        let Some((descriptor, handler)) = entry else {
            return Err(RpcFailure::new(
                MCP_INVALID_PARAMS,
                format!("Unknown prompt: {name}"),
            ));
        };

        let missing = missing_required(&descriptor, &arguments);
        if !missing.is_empty() {
            return Err(RpcFailure::new(
                MCP_INVALID_PARAMS,
                format!(
                    "Missing required argument(s) for {name}: {}",
                    missing.join(", ")
                ),
            ));
        }

        let messages = handler(arguments)
            .await
            .map_err(|message| RpcFailure::new(MCP_INTERNAL_ERROR, message))?;
        Ok(PromptResult {
            is_error: false,
            description: Some(descriptor.description.clone()).filter(|text| !text.is_empty()),
            messages,
        }
        .to_value())
    }
}

fn missing_required<'a>(descriptor: &'a CapabilityDescriptor, arguments: &Arguments) -> Vec<&'a str> {
    descriptor
        .required_parameters()
        .filter(|param| {
            arguments
                .get(&param.name)
                .map_or(true, ArgumentValue::is_null)
        })
        .map(|param| param.name.as_str())
        .collect()
}
