//! Invocation results and the helpers that reshape them for callers.
//!
//! Error-flag inspection ([`InvocationResult::is_error`]) and content-shape
//! inspection ([`InvocationResult::as_text`], [`InvocationResult::as_shape`])
//! are kept separate so call sites can pick a representation independently
//! of how they handle failures.

use base64::Engine;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::error::Error as StdError;
use std::fmt;

/// Returned by [`InvocationResult::as_text`] when no text block is present.
pub const NO_RESULT: &str = "no result";

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Image {
        data: String,
        mime_type: String,
    },
    /// Audio and blob payloads, kept base64-encoded.
    Binary {
        data: String,
        mime_type: Option<String>,
        uri: Option<String>,
    },
    Other(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Parses one entry of a `tools/call` or `prompts/get` content array.
    pub fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str);
        match field("type") {
            Some("text") => match field("text") {
                Some(text) => ContentBlock::Text(text.to_string()),
                None => ContentBlock::Other(value.clone()),
            },
            Some("image") => match (field("data"), field("mimeType")) {
                (Some(data), Some(mime_type)) => ContentBlock::Image {
                    data: data.to_string(),
                    mime_type: mime_type.to_string(),
                },
                _ => ContentBlock::Other(value.clone()),
            },
            Some("audio") => match field("data") {
                Some(data) => ContentBlock::Binary {
                    data: data.to_string(),
                    mime_type: field("mimeType").map(str::to_string),
                    uri: None,
                },
                None => ContentBlock::Other(value.clone()),
            },
            Some("resource") => match value.get("resource") {
                Some(resource) => Self::from_resource_contents(resource),
                None => ContentBlock::Other(value.clone()),
            },
            _ => ContentBlock::Other(value.clone()),
        }
    }

    /// Parses one entry of a `resources/read` `contents` array.
    pub fn from_resource_contents(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str);
        if let Some(text) = field("text") {
            return ContentBlock::Text(text.to_string());
        }
        match field("blob") {
            Some(blob) => ContentBlock::Binary {
                data: blob.to_string(),
                mime_type: field("mimeType").map(str::to_string),
                uri: field("uri").map(str::to_string),
            },
            None => ContentBlock::Other(value.clone()),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ContentBlock::Text(text) => json!({"type": "text", "text": text}),
            ContentBlock::Image { data, mime_type } => {
                json!({"type": "image", "data": data, "mimeType": mime_type})
            }
            ContentBlock::Binary {
                data,
                mime_type,
                uri,
            } => json!({
                "type": "resource",
                "resource": {
                    "uri": uri.clone().unwrap_or_default(),
                    "mimeType": mime_type,
                    "blob": data,
                }
            }),
            ContentBlock::Other(value) => value.clone(),
        }
    }

    /// Decodes the base64 payload of image and binary blocks.
    pub fn decode_bytes(&self) -> Option<Result<Vec<u8>, String>> {
        let data = match self {
            ContentBlock::Image { data, .. } | ContentBlock::Binary { data, .. } => data,
            _ => return None,
        };
        Some(
            base64::engine::general_purpose::STANDARD
                .decode(data.trim())
                .map_err(|err| err.to_string()),
        )
    }
}

/// Outcome of one tool call or resource read.
///
/// When `is_error` is set, `content` carries a human-readable diagnostic
/// rather than a value meant for programmatic use.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvocationResult {
    pub is_error: bool,
    pub content: Vec<ContentBlock>,
    pub structured_content: Option<Value>,
}

impl InvocationResult {
    pub fn success(content: Vec<ContentBlock>) -> Self {
        Self {
            is_error: false,
            content,
            structured_content: None,
        }
    }

    pub fn success_text(text: impl Into<String>) -> Self {
        Self::success(vec![ContentBlock::text(text)])
    }

    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ContentBlock::text(diagnostic)],
            structured_content: None,
        }
    }

    pub fn from_call_tool_value(value: &Value) -> Result<Self, String> {
        let content = value
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| "Tool result is missing `content`.".to_string())?
            .iter()
            .map(ContentBlock::from_value)
            .collect();
        Ok(Self {
            is_error: value
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            content,
            structured_content: value.get("structuredContent").cloned(),
        })
    }

    pub fn from_read_resource_value(value: &Value) -> Result<Self, String> {
        let content = value
            .get("contents")
            .and_then(Value::as_array)
            .ok_or_else(|| "Resource result is missing `contents`.".to_string())?
            .iter()
            .map(ContentBlock::from_resource_contents)
            .collect();
        Ok(Self::success(content))
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::as_text)
    }

    /// First text block, or [`NO_RESULT`] when there is none.
    pub fn as_text(&self) -> String {
        self.first_text().unwrap_or(NO_RESULT).to_string()
    }

    /// Deserializes the first text block into `T`.
    pub fn as_structured<T: DeserializeOwned>(&self) -> Result<T, ConversionError> {
        let text = self.convertible_text()?;
        serde_json::from_str::<T>(text).map_err(|err| ConversionError::Malformed {
            raw: text.to_string(),
            message: err.to_string(),
        })
    }

    /// Parses the first text block and checks it against `shape`.
    pub fn as_shape(&self, shape: &StructuredShape) -> Result<Value, ConversionError> {
        let value: Value = self.as_structured()?;
        let mismatch = |expected: String| ConversionError::ShapeMismatch {
            raw: self.first_text().unwrap_or_default().to_string(),
            expected,
        };
        match shape {
            StructuredShape::Mapping if value.is_object() => Ok(value),
            StructuredShape::Mapping => Err(mismatch("a mapping".to_string())),
            StructuredShape::List if value.is_array() => Ok(value),
            StructuredShape::List => Err(mismatch("a list".to_string())),
            StructuredShape::Schema(schema) => {
                let validator = jsonschema::validator_for(schema)
                    .map_err(|err| mismatch(format!("a valid schema ({err})")))?;
                let failures: Vec<String> = validator
                    .iter_errors(&value)
                    .map(|err| err.to_string())
                    .collect();
                if failures.is_empty() {
                    Ok(value)
                } else {
                    Err(mismatch(format!(
                        "a value matching the schema: {}",
                        failures.join("; ")
                    )))
                }
            }
        }
    }

    fn convertible_text(&self) -> Result<&str, ConversionError> {
        if self.is_error {
            return Err(ConversionError::InvocationFailed {
                diagnostic: self.as_text(),
            });
        }
        self.first_text().ok_or(ConversionError::NoText)
    }

    pub fn to_call_tool_value(&self) -> Value {
        let mut value = json!({
            "content": self.content.iter().map(ContentBlock::to_value).collect::<Vec<_>>(),
            "isError": self.is_error,
        });
        if let (Some(structured), Some(object)) =
            (&self.structured_content, value.as_object_mut())
        {
            object.insert("structuredContent".to_string(), structured.clone());
        }
        value
    }
}

/// Target shape for [`InvocationResult::as_shape`].
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredShape {
    Mapping,
    List,
    /// A JSON Schema the parsed value must satisfy.
    Schema(Value),
}

/// Content could not be reshaped into the requested form.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionError {
    NoText,
    InvocationFailed { diagnostic: String },
    Malformed { raw: String, message: String },
    ShapeMismatch { raw: String, expected: String },
}

impl ConversionError {
    /// The offending text, when there was any.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            ConversionError::Malformed { raw, .. } | ConversionError::ShapeMismatch { raw, .. } => {
                Some(raw)
            }
            ConversionError::InvocationFailed { diagnostic } => Some(diagnostic),
            ConversionError::NoText => None,
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::NoText => write!(f, "Result has no text content to convert"),
            ConversionError::InvocationFailed { diagnostic } => {
                write!(f, "Cannot convert a failed invocation: {diagnostic}")
            }
            ConversionError::Malformed { raw, message } => {
                write!(f, "Failed to parse result ({message}): {raw}")
            }
            ConversionError::ShapeMismatch { raw, expected } => {
                write!(f, "Expected {expected}, got: {raw}")
            }
        }
    }
}

impl StdError for ConversionError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: ContentBlock,
}

impl PromptMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: ContentBlock::text(text),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: ContentBlock::text(text),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({"role": self.role.as_str(), "content": self.content.to_value()})
    }
}

/// Messages rendered by the peer that owns a prompt template.
///
/// On failure `description` carries the diagnostic and `messages` is empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PromptResult {
    pub is_error: bool,
    pub description: Option<String>,
    pub messages: Vec<PromptMessage>,
}

impl PromptResult {
    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self {
            is_error: true,
            description: Some(diagnostic.into()),
            messages: Vec::new(),
        }
    }

    pub fn from_get_prompt_value(value: &Value) -> Result<Self, String> {
        let messages = value
            .get("messages")
            .and_then(Value::as_array)
            .ok_or_else(|| "Prompt result is missing `messages`.".to_string())?
            .iter()
            .map(|message| {
                let role = message
                    .get("role")
                    .and_then(Value::as_str)
                    .and_then(Role::parse)
                    .ok_or_else(|| "Prompt message has an unknown role.".to_string())?;
                let content = message
                    .get("content")
                    .map(ContentBlock::from_value)
                    .ok_or_else(|| "Prompt message is missing `content`.".to_string())?;
                Ok::<_, String>(PromptMessage { role, content })
            })
            .collect::<Result<Vec<_>, String>>()?;
        Ok(Self {
            is_error: false,
            description: value
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            messages,
        })
    }

    pub fn first_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .find_map(|message| message.content.as_text())
    }

    /// Text messages as `(role, text)` pairs, ready for a completion request.
    pub fn as_conversation(&self) -> Vec<(Role, String)> {
        self.messages
            .iter()
            .filter_map(|message| {
                message
                    .content
                    .as_text()
                    .map(|text| (message.role, text.to_string()))
            })
            .collect()
    }

    pub fn to_value(&self) -> Value {
        json!({
            "description": self.description,
            "messages": self.messages.iter().map(PromptMessage::to_value).collect::<Vec<_>>(),
        })
    }
}
