//! In-memory user store behind the demo server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserStatus {
    Active,
    Inactive,
    Disabled,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
            UserStatus::Disabled => "DISABLED",
        }
    }
}

impl FromStr for UserStatus {
    type Err = DirectoryError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(UserStatus::Active),
            "INACTIVE" => Ok(UserStatus::Inactive),
            "DISABLED" => Ok(UserStatus::Disabled),
            _ => Err(DirectoryError::InvalidStatus(raw.to_string())),
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<i64>,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub age: Option<i64>,
}

/// Fields to overwrite. Blank strings count as "leave unchanged".
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub age: Option<i64>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCounts {
    pub total_users: usize,
    pub active_users: usize,
    pub inactive_users: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    DuplicateUsername(String),
    DuplicateEmail(String),
    UnknownId(u64),
    InvalidStatus(String),
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::DuplicateUsername(username) => {
                write!(f, "Username '{username}' already exists")
            }
            DirectoryError::DuplicateEmail(email) => {
                write!(f, "Email '{email}' is already in use")
            }
            DirectoryError::UnknownId(id) => write!(f, "No user with id {id}"),
            DirectoryError::InvalidStatus(raw) => write!(
                f,
                "Unknown status '{raw}'. Expected ACTIVE, INACTIVE or DISABLED"
            ),
        }
    }
}

impl std::error::Error for DirectoryError {}

#[derive(Debug, Default)]
struct Users {
    by_id: BTreeMap<u64, User>,
    next_id: u64,
}

impl Users {
    fn conflict(&self, id: Option<u64>, username: &str, email: &str) -> Option<DirectoryError> {
        let others = self.by_id.values().filter(|user| Some(user.id) != id);
        for user in others {
            if user.username == username {
                return Some(DirectoryError::DuplicateUsername(username.to_string()));
            }
            if user.email == email {
                return Some(DirectoryError::DuplicateEmail(email.to_string()));
            }
        }
        None
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: RwLock<Users>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, new_user: NewUser) -> Result<User, DirectoryError> {
        let mut users = self.users.write().await;
        if let Some(conflict) = users.conflict(None, &new_user.username, &new_user.email) {
            return Err(conflict);
        }
        users.next_id += 1;
        let now = Utc::now();
        let user = User {
            id: users.next_id,
            username: new_user.username,
            email: new_user.email,
            phone: non_blank(new_user.phone),
            age: new_user.age,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        };
        users.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    pub async fn get(&self, id: u64) -> Option<User> {
        self.users.read().await.by_id.get(&id).cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<User> {
        self.users
            .read()
            .await
            .by_id
            .values()
            .find(|user| user.username == username)
            .cloned()
    }

    pub async fn all(&self) -> Vec<User> {
        self.filtered(|_| true).await
    }

    pub async fn with_status(&self, status: UserStatus) -> Vec<User> {
        self.filtered(|user| user.status == status).await
    }

    /// Users whose age lies in `min..=max`. Users without an age never match.
    pub async fn in_age_range(&self, min: i64, max: i64) -> Vec<User> {
        self.filtered(|user| user.age.is_some_and(|age| (min..=max).contains(&age)))
            .await
    }

    /// Case-insensitive substring match on the username.
    pub async fn search(&self, keyword: &str) -> Vec<User> {
        let keyword = keyword.to_lowercase();
        self.filtered(|user| user.username.to_lowercase().contains(&keyword))
            .await
    }

    async fn filtered(&self, keep: impl Fn(&User) -> bool) -> Vec<User> {
        self.users
            .read()
            .await
            .by_id
            .values()
            .filter(|user| keep(user))
            .cloned()
            .collect()
    }

    pub async fn update(&self, id: u64, update: UserUpdate) -> Result<User, DirectoryError> {
        let mut users = self.users.write().await;
        let current = users
            .by_id
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::UnknownId(id))?;

        let username = non_blank(update.username).unwrap_or(current.username);
        let email = non_blank(update.email).unwrap_or(current.email);
        if let Some(conflict) = users.conflict(Some(id), &username, &email) {
            return Err(conflict);
        }

        let user = User {
            username,
            email,
            phone: non_blank(update.phone).or(current.phone),
            age: update.age.or(current.age),
            status: update.status.unwrap_or(current.status),
            updated_at: Utc::now(),
            ..current
        };
        users.by_id.insert(id, user.clone());
        Ok(user)
    }

    pub async fn delete(&self, id: u64) -> Result<User, DirectoryError> {
        self.users
            .write()
            .await
            .by_id
            .remove(&id)
            .ok_or(DirectoryError::UnknownId(id))
    }

    pub async fn count(&self) -> usize {
        self.users.read().await.by_id.len()
    }

    /// Anyone not active (disabled included) counts as inactive.
    pub async fn counts(&self) -> UserCounts {
        let users = self.users.read().await;
        let total_users = users.by_id.len();
        let active_users = users
            .by_id
            .values()
            .filter(|user| user.status == UserStatus::Active)
            .count();
        UserCounts {
            total_users,
            active_users,
            inactive_users: total_users - active_users,
        }
    }
}
