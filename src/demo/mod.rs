//! A small user-directory MCP server.
//!
//! Backs the `passerelle-user-server` binary and doubles as an in-process
//! peer for exercising the bridge end to end.

pub mod directory;

pub use directory::{DirectoryError, NewUser, User, UserDirectory, UserStatus, UserUpdate};

use crate::mcp::capability::TypeHint;
use crate::mcp::content::{InvocationResult, PromptMessage};
use crate::mcp::server::{McpServer, PromptSpec, ResourceBody, ResourceSpec, ToolSpec};
use crate::mcp::value::Arguments;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

pub const SERVER_NAME: &str = "passerelle-users";
const JSON_MIME: &str = "application/json";

/// Builds the demo server over `directory`.
pub fn build_server(directory: Arc<UserDirectory>) -> McpServer {
    let started = Instant::now();

    McpServer::builder(SERVER_NAME)
        .version(env!("CARGO_PKG_VERSION"))
        .instructions("Manage the user directory with the user tools; see users://stats for totals.")
        .tool(
            ToolSpec::new("createUser", "Create a user from a username and email")
                .required("username", TypeHint::String, "Unique username")
                .required("email", TypeHint::String, "Unique email address")
                .optional("phone", TypeHint::String, "Phone number")
                .optional("age", TypeHint::Integer, "Age in years"),
            bind(&directory, create_user),
        )
        .tool(
            ToolSpec::new("getUserById", "Look up a user by id")
                .required("id", TypeHint::Integer, "User id"),
            bind(&directory, get_user_by_id),
        )
        .tool(
            ToolSpec::new("getUserByUsername", "Look up a user by username")
                .required("username", TypeHint::String, "Username"),
            bind(&directory, get_user_by_username),
        )
        .tool(ToolSpec::new("getAllUsers", "List every user"), bind(&directory, get_all_users))
        .tool(
            ToolSpec::new("getUsersByStatus", "List users with a given status").required(
                "status",
                TypeHint::String,
                "ACTIVE, INACTIVE or DISABLED",
            ),
            bind(&directory, get_users_by_status),
        )
        .tool(
            ToolSpec::new("updateUser", "Update a user; omitted or blank fields are kept")
                .required("id", TypeHint::Integer, "User id")
                .optional("username", TypeHint::String, "New username")
                .optional("email", TypeHint::String, "New email address")
                .optional("phone", TypeHint::String, "New phone number")
                .optional("age", TypeHint::Integer, "New age")
                .optional("status", TypeHint::String, "ACTIVE, INACTIVE or DISABLED"),
            bind(&directory, update_user),
        )
        .tool(
            ToolSpec::new("deleteUser", "Delete a user by id")
                .required("id", TypeHint::Integer, "User id"),
            bind(&directory, delete_user),
        )
        .tool(
            ToolSpec::new("getUsersByAgeRange", "List users whose age lies in a range")
                .required("minAge", TypeHint::Integer, "Lowest age, inclusive")
                .required("maxAge", TypeHint::Integer, "Highest age, inclusive"),
            bind(&directory, get_users_by_age_range),
        )
        .tool(
            ToolSpec::new("searchUsers", "Find users whose username contains a keyword")
                .required("keyword", TypeHint::String, "Keyword, case-insensitive"),
            bind(&directory, search_users),
        )
        .tool(ToolSpec::new("countUsers", "Count users"), bind(&directory, count_users))
        .resource(
            ResourceSpec::new("system://info", "system-info", "Server identity and capabilities")
                .mime_type(JSON_MIME),
            || async {
                json_body(&json!({
                    "serverName": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol": "MCP",
                    "type": "user-directory",
                    "capabilities": ["tools", "resources", "prompts"],
                    "timestamp": Utc::now().to_rfc3339(),
                }))
            },
        )
        .resource(
            ResourceSpec::new("users://stats", "user-stats", "User totals by status")
                .mime_type(JSON_MIME),
            {
                let directory = Arc::clone(&directory);
                move || {
                    let directory = Arc::clone(&directory);
                    async move {
                        let counts = directory.counts().await;
                        json_body(&json!({
                            "totalUsers": counts.total_users,
                            "activeUsers": counts.active_users,
                            "inactiveUsers": counts.inactive_users,
                            "timestamp": Utc::now().to_rfc3339(),
                        }))
                    }
                }
            },
        )
        .resource(
            ResourceSpec::new("system://status", "system-status", "Server health")
                .mime_type(JSON_MIME),
            move || async move {
                let processors = std::thread::available_parallelism()
                    .map(|count| count.get())
                    .unwrap_or(1);
                json_body(&json!({
                    "status": "healthy",
                    "uptimeSecs": started.elapsed().as_secs(),
                    "processors": processors,
                    "timestamp": Utc::now().to_rfc3339(),
                }))
            },
        )
        .prompt(
            PromptSpec::new("user-query-assistant", "Helps look up users")
                .argument("queryType", "byId, byName or anything else for all users", false)
                .argument("queryValue", "Id or username to look up", false),
            |arguments| async move { Ok(vec![PromptMessage::user(query_prompt(&arguments))]) },
        )
        .prompt(
            PromptSpec::new("data-analysis", "Guides an analysis of the user data")
                .argument("analysisType", "trends, distribution or stats", false),
            |arguments| async move { Ok(vec![PromptMessage::user(analysis_prompt(&arguments))]) },
        )
        .prompt(
            PromptSpec::new("user-creation-assistant", "Walks through creating a user")
                .argument("username", "Suggested username", false)
                .argument("email", "Suggested email address", false),
            |arguments| async move { Ok(vec![PromptMessage::user(creation_prompt(&arguments))]) },
        )
        .build()
}

fn bind<F, Fut>(
    directory: &Arc<UserDirectory>,
    handler: F,
) -> impl Fn(Arguments) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<UserDirectory>, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = InvocationResult> + Send + 'static,
{
    let directory = Arc::clone(directory);
    move |arguments| handler(Arc::clone(&directory), arguments)
}

fn json_body(value: &serde_json::Value) -> Result<ResourceBody, String> {
    serde_json::to_string_pretty(value)
        .map(ResourceBody::Text)
        .map_err(|err| err.to_string())
}

fn json_result<T: Serialize>(value: &T) -> InvocationResult {
    match serde_json::to_string_pretty(value) {
        Ok(text) => InvocationResult::success_text(text),
        Err(err) => InvocationResult::error(format!("Failed to encode result: {err}")),
    }
}

fn text_arg(arguments: &Arguments, key: &str) -> Option<String> {
    arguments
        .get(key)
        .and_then(|value| value.as_str())
        .map(str::to_string)
}

fn int_arg(arguments: &Arguments, key: &str) -> Result<Option<i64>, InvocationResult> {
    match arguments.get(key) {
        None => Ok(None),
        Some(value) if value.is_null() => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| InvocationResult::error(format!("`{key}` must be an integer"))),
    }
}

fn id_arg(arguments: &Arguments) -> Result<u64, InvocationResult> {
    match int_arg(arguments, "id")? {
        Some(id) if id > 0 => Ok(id as u64),
        _ => Err(InvocationResult::error("`id` must be a positive integer")),
    }
}

async fn create_user(directory: Arc<UserDirectory>, arguments: Arguments) -> InvocationResult {
    let age = match int_arg(&arguments, "age") {
        Ok(age) => age,
        Err(failure) => return failure,
    };
    let new_user = NewUser {
        username: text_arg(&arguments, "username").unwrap_or_default(),
        email: text_arg(&arguments, "email").unwrap_or_default(),
        phone: text_arg(&arguments, "phone"),
        age,
    };
    match directory.create(new_user).await {
        Ok(user) => {
            info!(user_id = user.id, username = %user.username, "User created");
            json_result(&user)
        }
        Err(err) => InvocationResult::error(err.to_string()),
    }
}

async fn get_user_by_id(directory: Arc<UserDirectory>, arguments: Arguments) -> InvocationResult {
    let id = match id_arg(&arguments) {
        Ok(id) => id,
        Err(failure) => return failure,
    };
    match directory.get(id).await {
        Some(user) => json_result(&user),
        None => InvocationResult::error(DirectoryError::UnknownId(id).to_string()),
    }
}

async fn get_user_by_username(
    directory: Arc<UserDirectory>,
    arguments: Arguments,
) -> InvocationResult {
    let username = text_arg(&arguments, "username").unwrap_or_default();
    match directory.find_by_username(&username).await {
        Some(user) => json_result(&user),
        None => InvocationResult::error(format!("No user named '{username}'")),
    }
}

async fn get_all_users(directory: Arc<UserDirectory>, _arguments: Arguments) -> InvocationResult {
    json_result(&directory.all().await)
}

async fn get_users_by_status(
    directory: Arc<UserDirectory>,
    arguments: Arguments,
) -> InvocationResult {
    let raw = text_arg(&arguments, "status").unwrap_or_default();
    match raw.parse::<UserStatus>() {
        Ok(status) => json_result(&directory.with_status(status).await),
        Err(err) => InvocationResult::error(err.to_string()),
    }
}

async fn update_user(directory: Arc<UserDirectory>, arguments: Arguments) -> InvocationResult {
    let id = match id_arg(&arguments) {
        Ok(id) => id,
        Err(failure) => return failure,
    };
    let age = match int_arg(&arguments, "age") {
        Ok(age) => age,
        Err(failure) => return failure,
    };
    let status = match text_arg(&arguments, "status").filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => match raw.parse::<UserStatus>() {
            Ok(status) => Some(status),
            Err(err) => return InvocationResult::error(err.to_string()),
        },
        None => None,
    };
    let update = UserUpdate {
        username: text_arg(&arguments, "username"),
        email: text_arg(&arguments, "email"),
        phone: text_arg(&arguments, "phone"),
        age,
        status,
    };
    match directory.update(id, update).await {
        Ok(user) => json_result(&user),
        Err(err) => InvocationResult::error(err.to_string()),
    }
}

async fn delete_user(directory: Arc<UserDirectory>, arguments: Arguments) -> InvocationResult {
    let id = match id_arg(&arguments) {
        Ok(id) => id,
        Err(failure) => return failure,
    };
    match directory.delete(id).await {
        Ok(user) => {
            info!(user_id = id, username = %user.username, "User deleted");
            InvocationResult::success_text(format!("Deleted user '{}'", user.username))
        }
        Err(err) => InvocationResult::error(err.to_string()),
    }
}

async fn get_users_by_age_range(
    directory: Arc<UserDirectory>,
    arguments: Arguments,
) -> InvocationResult {
    let bounds = int_arg(&arguments, "minAge").and_then(|min| {
        int_arg(&arguments, "maxAge").map(|max| (min.unwrap_or(0), max.unwrap_or(i64::MAX)))
    });
    match bounds {
        Ok((min, max)) if min <= max => json_result(&directory.in_age_range(min, max).await),
        Ok((min, max)) => {
            InvocationResult::error(format!("minAge ({min}) is greater than maxAge ({max})"))
        }
        Err(failure) => failure,
    }
}

async fn search_users(directory: Arc<UserDirectory>, arguments: Arguments) -> InvocationResult {
    let keyword = text_arg(&arguments, "keyword").unwrap_or_default();
    json_result(&directory.search(&keyword).await)
}

async fn count_users(directory: Arc<UserDirectory>, _arguments: Arguments) -> InvocationResult {
    InvocationResult::success_text(directory.count().await.to_string())
}

fn query_prompt(arguments: &Arguments) -> String {
    let query_type = text_arg(arguments, "queryType").unwrap_or_default();
    let value = text_arg(arguments, "queryValue").unwrap_or_default();
    let (tool, target) = match query_type.as_str() {
        "byId" => ("getUserById", format!("the user with id {value}")),
        "byName" => ("getUserByUsername", format!("the user named '{value}'")),
        _ => ("getAllUsers", "every user".to_string()),
    };
    format!(
        "You are a user directory assistant. Look up {target} with the `{tool}` tool \
         and summarize the result. If nothing is found, say so plainly."
    )
}

fn analysis_prompt(arguments: &Arguments) -> String {
    let focus = match text_arg(arguments, "analysisType").as_deref() {
        Some("trends") => "how registrations change over time, based on createdAt",
        Some("distribution") => "how users are spread across statuses and age groups",
        _ => "headline statistics: totals, active share and average age",
    };
    format!(
        "You are a data analyst. Use `countUsers` and `getAllUsers` to gather the user data, \
         then report on {focus}. Keep the findings short and quantitative."
    )
}

fn creation_prompt(arguments: &Arguments) -> String {
    let mut prompt = String::from(
        "Help create a new user with the `createUser` tool. Required fields: username and email. \
         Optional fields: phone and age.",
    );
    let suggested: Vec<String> = ["username", "email"]
        .iter()
        .filter_map(|key| text_arg(arguments, key).map(|value| format!("{key} = {value}")))
        .collect();
    if !suggested.is_empty() {
        prompt.push_str(" Start from: ");
        prompt.push_str(&suggested.join(", "));
        prompt.push('.');
    }
    prompt.push_str(" Ask for anything missing before calling the tool.");
    prompt
}

#[cfg(test)]
mod tests;
