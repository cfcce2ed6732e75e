use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_COMPLETION_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// One MCP peer the embedding application may talk to.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PeerConfig {
    pub id: String,
    pub display_name: String,
    /// `stdio` or `streamable-http` (the default when omitted)
    pub transport: Option<String>,
    /// Executable spawned for the stdio transport
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub env: Option<HashMap<String, String>>,
    /// Endpoint for the streamable HTTP transport
    pub base_url: Option<String>,
    /// Extra HTTP headers sent with every streamable HTTP request
    pub headers: Option<HashMap<String, String>>,
    pub protocol_version: Option<String>,
    pub enabled: Option<bool>,
    pub request_timeout_secs: Option<u64>,
}

impl PeerConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS)
    }
}

/// Settings for the OpenAI-compatible completion endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
}

impl CompletionConfig {
    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_COMPLETION_API_KEY_ENV)
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    pub completion: Option<CompletionConfig>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn find_peer(&self, id: &str) -> Option<&PeerConfig> {
        self.peers.iter().find(|peer| peer.id.eq_ignore_ascii_case(id))
    }

    pub fn enabled_peers(&self) -> impl Iterator<Item = &PeerConfig> {
        self.peers.iter().filter(|peer| peer.is_enabled())
    }

    /// Picks the requested peer, or the only enabled one when no id is given.
    pub fn select_peer(&self, id: Option<&str>) -> Result<&PeerConfig, String> {
        match id {
            Some(id) => match self.find_peer(id) {
                Some(peer) if peer.is_enabled() => Ok(peer),
                Some(_) => Err(format!("Peer is disabled: {id}.")),
                None => Err(format!("Unknown peer id: {id}.")),
            },
            None => {
                let mut enabled = self.enabled_peers();
                match (enabled.next(), enabled.next()) {
                    (Some(peer), None) => Ok(peer),
                    (None, _) => Err("No enabled peers configured.".to_string()),
                    (Some(_), Some(_)) => {
                        Err("Several peers are configured; pick one with --peer.".to_string())
                    }
                }
            }
        }
    }
}
