//! Descriptors for the tools, resources and prompts a peer advertises.
//!
//! Descriptors are parsed from MCP list responses on the client side and
//! rendered back into list responses by [`crate::mcp::server`]. Parameter
//! schemas are deliberately loose: they are checked when a call is made, not
//! when a capability is registered.

use crate::mcp::value::{ArgumentValue, Arguments};
use serde_json::{json, Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    Tool,
    Resource,
    Prompt,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::Tool,
        CapabilityKind::Resource,
        CapabilityKind::Prompt,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Resource => "resource",
            CapabilityKind::Prompt => "prompt",
        }
    }

    pub fn list_method(self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tools/list",
            CapabilityKind::Resource => "resources/list",
            CapabilityKind::Prompt => "prompts/list",
        }
    }

    pub fn list_changed_method(self) -> &'static str {
        match self {
            CapabilityKind::Tool => "notifications/tools/list_changed",
            CapabilityKind::Resource => "notifications/resources/list_changed",
            CapabilityKind::Prompt => "notifications/prompts/list_changed",
        }
    }

    pub fn from_list_changed_method(method: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.list_changed_method() == method)
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Loose type declared for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeHint {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl TypeHint {
    pub fn from_schema_type(value: Option<&Value>) -> Self {
        // Union types such as ["string", "null"] resolve to their first non-null member.
        let name = match value {
            Some(Value::String(name)) => Some(name.as_str()),
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(Value::as_str)
                .find(|name| *name != "null"),
            _ => None,
        };
        match name {
            Some("string") => TypeHint::String,
            Some("integer") => TypeHint::Integer,
            Some("number") => TypeHint::Number,
            Some("boolean") => TypeHint::Boolean,
            Some("array") => TypeHint::Array,
            Some("object") => TypeHint::Object,
            _ => TypeHint::Any,
        }
    }

    pub fn schema_type(self) -> Option<&'static str> {
        match self {
            TypeHint::String => Some("string"),
            TypeHint::Integer => Some("integer"),
            TypeHint::Number => Some("number"),
            TypeHint::Boolean => Some("boolean"),
            TypeHint::Array => Some("array"),
            TypeHint::Object => Some("object"),
            TypeHint::Any => None,
        }
    }

    /// Null is accepted everywhere and treated as an absent value.
    pub fn accepts(self, value: &ArgumentValue) -> bool {
        match (self, value) {
            (_, ArgumentValue::Null) | (TypeHint::Any, _) => true,
            (TypeHint::String, ArgumentValue::String(_)) => true,
            (TypeHint::Integer, ArgumentValue::Integer(_)) => true,
            (TypeHint::Integer, ArgumentValue::Float(value)) => value.fract() == 0.0,
            (TypeHint::Number, ArgumentValue::Integer(_) | ArgumentValue::Float(_)) => true,
            (TypeHint::Boolean, ArgumentValue::Bool(_)) => true,
            (TypeHint::Array, ArgumentValue::List(_)) => true,
            (TypeHint::Object, ArgumentValue::Map(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub type_hint: TypeHint,
    pub required: bool,
    pub description: Option<String>,
}

impl ParameterSpec {
    pub fn required(name: &str, type_hint: TypeHint, description: &str) -> Self {
        Self {
            name: name.to_string(),
            type_hint,
            required: true,
            description: non_empty(description),
        }
    }

    pub fn optional(name: &str, type_hint: TypeHint, description: &str) -> Self {
        Self {
            name: name.to_string(),
            type_hint,
            required: false,
            description: non_empty(description),
        }
    }
}

/// One invocable unit advertised by a peer.
///
/// Resources are identified by `uri`; `name` carries their display name.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub kind: CapabilityKind,
    pub parameters: Vec<ParameterSpec>,
    pub uri: Option<String>,
    pub mime_type: Option<String>,
    /// Whether names outside `parameters` may be passed. Only tool schemas
    /// can open this up, by omitting `additionalProperties: false`.
    pub accepts_undeclared: bool,
}

impl CapabilityDescriptor {
    pub fn tool(name: &str, description: &str, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: CapabilityKind::Tool,
            parameters,
            uri: None,
            mime_type: None,
            accepts_undeclared: false,
        }
    }

    pub fn prompt(name: &str, description: &str, parameters: Vec<ParameterSpec>) -> Self {
        Self {
            kind: CapabilityKind::Prompt,
            ..Self::tool(name, description, parameters)
        }
    }

    pub fn resource(uri: &str, name: &str, description: &str, mime_type: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: CapabilityKind::Resource,
            parameters: Vec::new(),
            uri: Some(uri.to_string()),
            mime_type: mime_type.map(str::to_string),
            accepts_undeclared: false,
        }
    }

    /// The identifier used for lookups and change notifications.
    pub fn key(&self) -> &str {
        match (&self.kind, &self.uri) {
            (CapabilityKind::Resource, Some(uri)) => uri,
            _ => &self.name,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.key() == name || self.name == name
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|param| param.name == name)
    }

    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterSpec> {
        self.parameters.iter().filter(|param| param.required)
    }

    pub fn from_tool_value(value: &Value) -> Result<Self, String> {
        let name = required_str(value, "name", "tool")?;
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let schema = value.get("inputSchema").unwrap_or(&Value::Null);
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let parameters = schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(param, property)| ParameterSpec {
                        name: param.clone(),
                        type_hint: TypeHint::from_schema_type(property.get("type")),
                        required: required.contains(&param.as_str()),
                        description: property
                            .get("description")
                            .and_then(Value::as_str)
                            .and_then(non_empty),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
        Ok(Self {
            accepts_undeclared: !closed,
            ..Self::tool(name, description, parameters)
        })
    }

    pub fn from_resource_value(value: &Value) -> Result<Self, String> {
        let uri = required_str(value, "uri", "resource")?;
        let name = value.get("name").and_then(Value::as_str).unwrap_or(uri);
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mime_type = value.get("mimeType").and_then(Value::as_str);
        Ok(Self::resource(uri, name, description, mime_type))
    }

    pub fn from_prompt_value(value: &Value) -> Result<Self, String> {
        let name = required_str(value, "name", "prompt")?;
        let description = value
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let parameters = value
            .get("arguments")
            .and_then(Value::as_array)
            .map(|arguments| {
                arguments
                    .iter()
                    .filter_map(|argument| {
                        let name = argument.get("name")?.as_str()?;
                        Some(ParameterSpec {
                            name: name.to_string(),
                            type_hint: TypeHint::String,
                            required: argument
                                .get("required")
                                .and_then(Value::as_bool)
                                .unwrap_or(false),
                            description: argument
                                .get("description")
                                .and_then(Value::as_str)
                                .and_then(non_empty),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self::prompt(name, description, parameters))
    }

    /// JSON Schema object for a tool's `inputSchema`.
    pub fn to_input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut property = Map::new();
            if let Some(schema_type) = param.type_hint.schema_type() {
                property.insert("type".to_string(), json!(schema_type));
            }
            if let Some(description) = &param.description {
                property.insert("description".to_string(), json!(description));
            }
            properties.insert(param.name.clone(), Value::Object(property));
        }
        let required: Vec<&str> = self
            .required_parameters()
            .map(|param| param.name.as_str())
            .collect();

        let mut schema = Map::new();
        schema.insert("type".to_string(), json!("object"));
        schema.insert("properties".to_string(), Value::Object(properties));
        if !required.is_empty() {
            schema.insert("required".to_string(), json!(required));
        }
        if !self.accepts_undeclared {
            schema.insert("additionalProperties".to_string(), json!(false));
        }
        Value::Object(schema)
    }

    /// Entry for a `tools/list`, `resources/list` or `prompts/list` response.
    pub fn to_list_entry(&self) -> Value {
        match self.kind {
            CapabilityKind::Tool => json!({
                "name": self.name,
                "description": self.description,
                "inputSchema": self.to_input_schema(),
            }),
            CapabilityKind::Resource => {
                let mut entry = json!({
                    "uri": self.key(),
                    "name": self.name,
                    "description": self.description,
                });
                if let (Some(mime_type), Some(object)) = (&self.mime_type, entry.as_object_mut()) {
                    object.insert("mimeType".to_string(), json!(mime_type));
                }
                entry
            }
            CapabilityKind::Prompt => json!({
                "name": self.name,
                "description": self.description,
                "arguments": self
                    .parameters
                    .iter()
                    .map(|param| json!({
                        "name": param.name,
                        "description": param.description.clone().unwrap_or_default(),
                        "required": param.required,
                    }))
                    .collect::<Vec<_>>(),
            }),
        }
    }
}

/// Checks provided arguments against the declared parameters.
///
/// Missing parameters are never reported here: the callee owns that check.
/// Prompt arguments are only checked by name, since any value is rendered
/// to a string before it is sent.
pub fn validate_arguments(
    descriptor: &CapabilityDescriptor,
    arguments: &Arguments,
) -> Result<(), String> {
    let check_types = descriptor.kind != CapabilityKind::Prompt;
    let mut problems = Vec::new();
    for (name, value) in arguments {
        if !value.is_finite() {
            problems.push(format!("argument `{name}` is not a finite number"));
            continue;
        }
        match descriptor.parameter(name) {
            None if descriptor.accepts_undeclared => {}
            None => problems.push(format!("unknown argument `{name}`")),
            Some(param) if check_types && !param.type_hint.accepts(value) => problems.push(format!(
                "argument `{name}` expects {} but got {}",
                param.type_hint.schema_type().unwrap_or("any"),
                value.type_name()
            )),
            Some(_) => {}
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Invalid arguments for {} `{}`: {}",
            descriptor.kind,
            descriptor.name,
            problems.join("; ")
        ))
    }
}

fn required_str<'a>(value: &'a Value, field: &str, label: &str) -> Result<&'a str, String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| format!("MCP {label} entry is missing `{field}`."))
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
