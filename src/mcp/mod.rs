//! Model Context Protocol bridge: discover what a peer offers, invoke it,
//! reshape the results, and follow its change notifications.

pub mod bridge;
pub mod capability;
pub mod client;
pub mod content;
pub mod error;
pub mod events;
pub mod registry;
pub mod server;
pub mod subscriber;
pub mod transport;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

pub use bridge::McpBridge;
pub use capability::{CapabilityDescriptor, CapabilityKind, ParameterSpec, TypeHint};
pub use client::McpPeer;
pub use content::{ContentBlock, ConversionError, InvocationResult, PromptResult, StructuredShape};
pub use error::BridgeError;
pub use value::{ArgumentValue, Arguments};
