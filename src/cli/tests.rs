use super::*;
use crate::core::config::PeerConfig;
use crate::mcp::capability::{CapabilityDescriptor, ParameterSpec, TypeHint};
use crate::mcp::content::{ContentBlock, InvocationResult, PromptMessage, PromptResult};
use crate::mcp::events::{BridgeEvent, ChangeDetail, ChangeHistory, InvocationOutcome};
use std::time::Duration;

#[test]
fn global_flags_work_after_the_subcommand() {
    let args = Args::try_parse_from([
        "passerelle",
        "call",
        "createUser",
        "--arg",
        "username=ada",
        "-a",
        "age=36",
        "--peer",
        "users",
        "--config",
        "/tmp/passerelle.toml",
    ])
    .expect("parse");
    assert_eq!(args.peer.as_deref(), Some("users"));
    assert_eq!(
        args.config.as_deref(),
        Some(std::path::Path::new("/tmp/passerelle.toml"))
    );
    let Commands::Call { tool, args, json } = args.command else {
        panic!("expected call");
    };
    assert_eq!(tool, "createUser");
    assert_eq!(args, vec!["username=ada", "age=36"]);
    assert!(json.is_none());
}

#[test]
fn ask_joins_the_trailing_instruction() {
    let args = Args::try_parse_from([
        "passerelle",
        "ask",
        "users://stats",
        "What",
        "stands",
        "out?",
    ])
    .expect("parse");
    let Commands::Ask { uri, instruction } = args.command else {
        panic!("expected ask");
    };
    assert_eq!(uri, "users://stats");
    assert_eq!(instruction.join(" "), "What stands out?");

    assert!(Args::try_parse_from(["passerelle", "ask", "users://stats"]).is_err());
}

#[test]
fn arguments_parse_json_literals_and_override_json() {
    let arguments = parse_arguments(
        &[
            "age=36".to_string(),
            "username=ada".to_string(),
            "note=a=b".to_string(),
        ],
        Some(r#"{"username": "grace", "phone": null}"#),
    )
    .expect("arguments");
    assert_eq!(arguments.get("age"), Some(&ArgumentValue::Integer(36)));
    assert_eq!(arguments.get("username"), Some(&ArgumentValue::from("ada")));
    assert_eq!(arguments.get("note"), Some(&ArgumentValue::from("a=b")));
    assert_eq!(arguments.get("phone"), Some(&ArgumentValue::Null));

    assert!(parse_arguments(&["novalue".to_string()], None).is_err());
    assert!(parse_arguments(&["=1".to_string()], None).is_err());
    assert_eq!(
        parse_arguments(&[], Some("[1, 2]")),
        Err("--json must be a JSON object.".to_string())
    );
}

#[test]
fn peers_render_with_transport_and_state() {
    let config = Config {
        peers: vec![
            PeerConfig {
                id: "users".to_string(),
                display_name: "User Directory".to_string(),
                transport: Some("stdio".to_string()),
                command: Some("passerelle-user-server".to_string()),
                ..PeerConfig::default()
            },
            PeerConfig {
                id: "remote".to_string(),
                base_url: Some("https://mcp.example.com/mcp".to_string()),
                enabled: Some(false),
                ..PeerConfig::default()
            },
        ],
        completion: None,
    };
    assert_eq!(
        render_peers(&config),
        "users   User Directory  [stdio] passerelle-user-server\n\
         remote  remote  [streamable-http] https://mcp.example.com/mcp (disabled)\n"
    );
    assert_eq!(render_peers(&Config::default()), "No peers configured.\n");
}

#[test]
fn descriptors_render_parameters() {
    let tools = vec![CapabilityDescriptor::tool(
        "createUser",
        "Create a user",
        vec![
            ParameterSpec::required("username", TypeHint::String, "Unique username"),
            ParameterSpec::optional("age", TypeHint::Integer, "Age in years"),
        ],
    )];
    assert_eq!(
        render_descriptors(CapabilityKind::Tool, &tools),
        "createUser  Create a user\n    username (string, required)  Unique username\n    age (integer)  Age in years\n"
    );

    let resources = vec![CapabilityDescriptor::resource(
        "users://stats",
        "user-stats",
        "User totals",
        Some("application/json"),
    )];
    assert_eq!(
        render_descriptors(CapabilityKind::Resource, &resources),
        "users://stats (user-stats) [application/json]  User totals\n"
    );
    assert_eq!(
        render_descriptors(CapabilityKind::Prompt, &[]),
        "No prompts.\n"
    );
}

#[test]
fn results_render_every_block() {
    let result = InvocationResult {
        is_error: false,
        content: vec![
            ContentBlock::text("first"),
            ContentBlock::Image {
                data: "AAEC".to_string(),
                mime_type: "image/png".to_string(),
            },
            ContentBlock::Binary {
                data: "AA==".to_string(),
                mime_type: None,
                uri: Some("file:///a.bin".to_string()),
            },
        ],
        structured_content: Some(serde_json::json!({"ok": true})),
    };
    assert_eq!(
        render_result(&result),
        "first\n[image image/png, 3 bytes]\n[binary file:///a.bin, 1 bytes]\n{\"ok\":true}"
    );
    assert_eq!(
        render_result(&InvocationResult::success(Vec::new())),
        "no result"
    );
    assert_eq!(
        render_result(&InvocationResult::error("Username 'ada' already exists")),
        "Username 'ada' already exists"
    );
}

#[test]
fn prompts_render_roles() {
    let prompt = PromptResult {
        is_error: false,
        description: Some("Walks through creating a user".to_string()),
        messages: vec![
            PromptMessage::user("Create ada."),
            PromptMessage::assistant("Which email?"),
        ],
    };
    assert_eq!(
        render_prompt(&prompt),
        "Walks through creating a user\n\nuser: Create ada.\nassistant: Which email?"
    );
    assert_eq!(
        render_prompt(&PromptResult::error("Unknown prompt: outro")),
        "Unknown prompt: outro"
    );
}

#[tokio::test]
async fn watch_lines_cover_cache_activity() {
    let history = ChangeHistory::new();
    let change = history
        .record(&PeerNotification {
            peer_id: "users".to_string(),
            kind: CapabilityKind::Tool,
            detail: Some(ChangeDetail::new("removed", &["deleteUser"], Some("retired"))),
        })
        .await;
    let line = render_event(&BridgeEvent::ChangeRecorded(change)).expect("line");
    assert!(line.starts_with("#1 "));
    assert!(line.ends_with(" tool removed [deleteUser] retired"));

    assert_eq!(
        render_event(&BridgeEvent::RefreshFailed {
            peer_id: "users".to_string(),
            kind: CapabilityKind::Prompt,
            message: "timed out".to_string(),
        }),
        Some("  prompt cache: refresh failed, keeping previous entries (timed out)".to_string())
    );
    assert_eq!(
        render_event(&BridgeEvent::InvocationFinished {
            peer_id: "users".to_string(),
            kind: CapabilityKind::Tool,
            name: "countUsers".to_string(),
            call_id: 1,
            outcome: InvocationOutcome::Success,
            elapsed: Duration::from_millis(3),
        }),
        None
    );
}
