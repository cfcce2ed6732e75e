use crate::mcp::capability::CapabilityKind;
use std::error::Error as StdError;
use std::fmt;

/// Faults raised by the bridge.
///
/// Failures the peer reports about a call it received are not faults; they
/// come back as error-flagged results instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The peer could not be reached, or answered with something unusable.
    /// Callers decide whether to retry.
    Connectivity { peer: String, message: String },

    /// A local registry lookup found no capability with this name.
    NotFound {
        peer: String,
        kind: CapabilityKind,
        name: String,
    },
}

impl BridgeError {
    pub fn connectivity(peer: &str, message: impl Into<String>) -> Self {
        BridgeError::Connectivity {
            peer: peer.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(peer: &str, kind: CapabilityKind, name: &str) -> Self {
        BridgeError::NotFound {
            peer: peer.to_string(),
            kind,
            name: name.to_string(),
        }
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, BridgeError::Connectivity { .. })
    }

    pub fn peer(&self) -> &str {
        match self {
            BridgeError::Connectivity { peer, .. } | BridgeError::NotFound { peer, .. } => peer,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Connectivity { peer, message } => {
                write!(f, "MCP peer {peer} is unreachable: {message}")
            }
            BridgeError::NotFound { peer, kind, name } => {
                write!(f, "MCP peer {peer} has no {kind} named {name}")
            }
        }
    }
}

impl StdError for BridgeError {}
