//! Declarations passed to [`super::McpServerBuilder`] alongside each handler.

use crate::mcp::capability::{CapabilityDescriptor, ParameterSpec, TypeHint};

/// A tool declaration: name, description and parameter schema.
#[derive(Debug, Clone)]
pub struct ToolSpec(CapabilityDescriptor);

impl ToolSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self(CapabilityDescriptor::tool(name, description, Vec::new()))
    }

    pub fn required(mut self, name: &str, type_hint: TypeHint, description: &str) -> Self {
        self.0
            .parameters
            .push(ParameterSpec::required(name, type_hint, description));
        self
    }

    pub fn optional(mut self, name: &str, type_hint: TypeHint, description: &str) -> Self {
        self.0
            .parameters
            .push(ParameterSpec::optional(name, type_hint, description));
        self
    }

    pub fn into_descriptor(self) -> CapabilityDescriptor {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct ResourceSpec(CapabilityDescriptor);

impl ResourceSpec {
    pub fn new(uri: &str, name: &str, description: &str) -> Self {
        Self(CapabilityDescriptor::resource(uri, name, description, None))
    }

    pub fn mime_type(mut self, mime_type: &str) -> Self {
        self.0.mime_type = Some(mime_type.to_string());
        self
    }

    pub fn into_descriptor(self) -> CapabilityDescriptor {
        self.0
    }
}

/// Prompt arguments are always strings on the wire.
#[derive(Debug, Clone)]
pub struct PromptSpec(CapabilityDescriptor);

impl PromptSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self(CapabilityDescriptor::prompt(name, description, Vec::new()))
    }

    pub fn argument(mut self, name: &str, description: &str, required: bool) -> Self {
        let param = if required {
            ParameterSpec::required(name, TypeHint::String, description)
        } else {
            ParameterSpec::optional(name, TypeHint::String, description)
        };
        self.0.parameters.push(param);
        self
    }

    pub fn into_descriptor(self) -> CapabilityDescriptor {
        self.0
    }
}

/// Body returned by a resource handler.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceBody {
    Text(String),
    Blob(Vec<u8>),
}

impl From<String> for ResourceBody {
    fn from(text: String) -> Self {
        ResourceBody::Text(text)
    }
}

impl From<&str> for ResourceBody {
    fn from(text: &str) -> Self {
        ResourceBody::Text(text.to_string())
    }
}
