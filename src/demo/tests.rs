use super::*;
use crate::args;
use crate::mcp::{McpBridge, McpPeer};
use serde_json::Value;

async fn bridge() -> McpBridge {
    let server = build_server(Arc::new(UserDirectory::new()));
    let (peer, _notifications) = McpPeer::connect_in_process("users", server)
        .await
        .expect("in-process peer");
    McpBridge::new(peer)
}

#[tokio::test]
async fn create_user_then_duplicate_is_an_error_result() {
    let bridge = bridge().await;

    let created = bridge
        .call_tool(
            "createUser",
            &args! { "username" => "alice", "email" => "alice@example.org", "age" => 30_i64 },
        )
        .await
        .expect("reachable");
    assert!(!created.is_error);
    let user: User = created.as_structured().expect("user json");
    assert_eq!(user.username, "alice");
    assert_eq!(user.age, Some(30));
    assert_eq!(user.status, UserStatus::Active);

    let duplicate = bridge
        .call_tool(
            "createUser",
            &args! { "username" => "alice", "email" => "other@example.org" },
        )
        .await
        .expect("reachable");
    assert!(duplicate.is_error);
    assert_eq!(duplicate.as_text(), "Username 'alice' already exists");
}

#[tokio::test]
async fn stats_resource_counts_by_status() {
    let bridge = bridge().await;
    for index in 0..10 {
        let username = format!("user{index}");
        let email = format!("user{index}@example.org");
        bridge
            .call_tool(
                "createUser",
                &args! { "username" => username.as_str(), "email" => email.as_str() },
            )
            .await
            .expect("create");
    }
    for id in [2_i64, 5, 9] {
        let updated = bridge
            .call_tool("updateUser", &args! { "id" => id, "status" => "inactive" })
            .await
            .expect("update");
        assert!(!updated.is_error, "{}", updated.as_text());
    }

    let stats = bridge.read_resource("users://stats").await.expect("stats");
    let stats: Value = stats.as_structured().expect("stats json");
    assert_eq!(stats["totalUsers"], 10);
    assert_eq!(stats["activeUsers"], 7);
    assert_eq!(stats["inactiveUsers"], 3);
    assert!(stats["timestamp"].is_string());

    let inactive = bridge
        .call_tool("getUsersByStatus", &args! { "status" => "INACTIVE" })
        .await
        .expect("by status");
    let inactive: Vec<User> = inactive.as_structured().expect("user list");
    let ids: Vec<u64> = inactive.iter().map(|user| user.id).collect();
    assert_eq!(ids, vec![2, 5, 9]);

    let count = bridge
        .call_tool("countUsers", &args! {})
        .await
        .expect("count");
    assert_eq!(count.as_text(), "10");
}

#[tokio::test]
async fn unknown_ids_and_bad_statuses_are_error_results() {
    let bridge = bridge().await;

    let missing = bridge
        .call_tool("getUserById", &args! { "id" => 42_i64 })
        .await
        .expect("reachable");
    assert!(missing.is_error);
    assert_eq!(missing.as_text(), "No user with id 42");

    let deleted = bridge
        .call_tool("deleteUser", &args! { "id" => 42_i64 })
        .await
        .expect("reachable");
    assert!(deleted.is_error);

    let status = bridge
        .call_tool("getUsersByStatus", &args! { "status" => "RETIRED" })
        .await
        .expect("reachable");
    assert!(status.is_error);
    assert!(status.as_text().contains("RETIRED"));
}

#[tokio::test]
async fn search_and_age_range_return_json_lists() {
    let bridge = bridge().await;
    for (username, age) in [("alice", 25_i64), ("bob", 41), ("malice", 33)] {
        let email = format!("{username}@example.org");
        bridge
            .call_tool(
                "createUser",
                &args! { "username" => username, "email" => email.as_str(), "age" => age },
            )
            .await
            .expect("create");
    }

    let found = bridge
        .call_tool("searchUsers", &args! { "keyword" => "ALICE" })
        .await
        .expect("search");
    let found: Vec<User> = found.as_structured().expect("list");
    assert_eq!(found.len(), 2);

    let ranged = bridge
        .call_tool(
            "getUsersByAgeRange",
            &args! { "minAge" => 30_i64, "maxAge" => 45_i64 },
        )
        .await
        .expect("range");
    let ranged: Vec<User> = ranged.as_structured().expect("list");
    let names: Vec<&str> = ranged.iter().map(|user| user.username.as_str()).collect();
    assert_eq!(names, vec!["bob", "malice"]);

    let empty = bridge
        .call_tool("searchUsers", &args! { "keyword" => "zed" })
        .await
        .expect("search");
    assert!(!empty.is_error);
    assert_eq!(empty.as_structured::<Vec<User>>().expect("list"), Vec::new());
}

#[tokio::test]
async fn system_resources_are_json() {
    let bridge = bridge().await;

    let info = bridge.read_resource("system://info").await.expect("info");
    let info: Value = info.as_structured().expect("json");
    assert_eq!(info["serverName"], SERVER_NAME);
    assert_eq!(info["capabilities"][2], "prompts");

    let status = bridge
        .read_resource("system-status")
        .await
        .expect("by name");
    let status: Value = status.as_structured().expect("json");
    assert_eq!(status["status"], "healthy");
}

#[tokio::test]
async fn prompts_steer_towards_the_right_tools() {
    let bridge = bridge().await;

    let by_id = bridge
        .get_prompt(
            "user-query-assistant",
            &args! { "queryType" => "byId", "queryValue" => "7" },
        )
        .await
        .expect("prompt");
    assert!(!by_id.is_error);
    let text = by_id.first_text().expect("message");
    assert!(text.contains("getUserById"));
    assert!(text.contains("id 7"));

    let analysis = bridge
        .get_prompt("data-analysis", &args! {})
        .await
        .expect("prompt");
    assert!(analysis
        .first_text()
        .is_some_and(|text| text.contains("countUsers")));

    let creation = bridge
        .get_prompt("user-creation-assistant", &args! { "username" => "ada" })
        .await
        .expect("prompt");
    let text = creation.first_text().expect("message");
    assert!(text.contains("createUser"));
    assert!(text.contains("username = ada"));
    assert!(!text.contains("email ="));
}

#[tokio::test]
async fn numeric_prompt_arguments_reach_the_peer_as_text() {
    let bridge = bridge().await;
    let arguments = crate::cli::parse_arguments(
        &["queryType=byId".to_string(), "queryValue=42".to_string()],
        None,
    )
    .expect("arguments");
    assert_eq!(
        arguments.get("queryValue"),
        Some(&crate::mcp::value::ArgumentValue::Integer(42))
    );

    let prompt = bridge
        .get_prompt("user-query-assistant", &arguments)
        .await
        .expect("prompt");
    assert!(!prompt.is_error, "{:?}", prompt.description);
    assert!(prompt
        .first_text()
        .is_some_and(|text| text.contains("the user with id 42")));

    let unknown = bridge
        .get_prompt("user-query-assistant", &args! { "queryId" => 42_i64 })
        .await
        .expect("prompt");
    assert!(unknown.is_error);
}
