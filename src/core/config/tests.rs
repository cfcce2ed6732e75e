use super::data::{path_display, Config, PeerConfig, DEFAULT_REQUEST_TIMEOUT_SECONDS};
use super::io::ConfigError;
use std::fs;
use tempfile::TempDir;

const SAMPLE_CONFIG: &str = r#"
[[peers]]
id = "users"
display_name = "User Server"
transport = "stdio"
command = "passerelle-user-server"
args = ["--seed"]
request_timeout_secs = 15

[[peers]]
id = "remote"
display_name = "Remote"
base_url = "https://mcp.example.com/mcp"
enabled = false

[peers.headers]
X-Tenant = "acme"

[completion]
base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
"#;

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert!(config.peers.is_empty());
    assert!(config.completion.is_none());
}

#[test]
fn parses_peers_and_completion_settings() {
    let config = Config::from_toml_str(SAMPLE_CONFIG).expect("config should parse");

    assert_eq!(config.peers.len(), 2);
    let users = config.find_peer("USERS").expect("lookup is case-insensitive");
    assert_eq!(users.command.as_deref(), Some("passerelle-user-server"));
    assert_eq!(users.args.as_deref(), Some(&["--seed".to_string()][..]));
    assert_eq!(users.request_timeout_secs(), 15);

    let remote = config.find_peer("remote").expect("remote peer");
    assert!(!remote.is_enabled());
    assert_eq!(
        remote
            .headers
            .as_ref()
            .and_then(|headers| headers.get("X-Tenant"))
            .map(String::as_str),
        Some("acme")
    );
    assert_eq!(remote.request_timeout_secs(), DEFAULT_REQUEST_TIMEOUT_SECONDS);

    let completion = config.completion.expect("completion section");
    assert_eq!(completion.model, "gpt-4o-mini");
    assert_eq!(completion.api_key_env(), "OPENAI_API_KEY");
}

#[test]
fn select_peer_defaults_to_single_enabled_peer() {
    let config = Config::from_toml_str(SAMPLE_CONFIG).expect("config should parse");

    let selected = config.select_peer(None).expect("one enabled peer");
    assert_eq!(selected.id, "users");

    let err = config.select_peer(Some("remote")).expect_err("disabled peer");
    assert_eq!(err, "Peer is disabled: remote.");

    let err = config.select_peer(Some("ghost")).expect_err("unknown peer");
    assert_eq!(err, "Unknown peer id: ghost.");
}

#[test]
fn select_peer_requires_choice_when_ambiguous() {
    let config = Config {
        peers: vec![
            PeerConfig {
                id: "a".to_string(),
                ..PeerConfig::default()
            },
            PeerConfig {
                id: "b".to_string(),
                ..PeerConfig::default()
            },
        ],
        completion: None,
    };

    assert!(config.select_peer(None).is_err());
    assert_eq!(config.select_peer(Some("B")).map(|peer| peer.id.as_str()), Ok("b"));
}

#[test]
fn zero_timeout_falls_back_to_default() {
    let peer = PeerConfig {
        request_timeout_secs: Some(0),
        ..PeerConfig::default()
    };
    assert_eq!(peer.request_timeout_secs(), DEFAULT_REQUEST_TIMEOUT_SECONDS);
}

#[test]
fn parse_errors_carry_the_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[[peers]]\nid = 42\n").expect("write config");

    let err = Config::load_from_path(&config_path).expect_err("invalid config");
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains(&path_display(&config_path)));
}
