//! Request and response payloads of the `UserService` calls.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::{Role, User, UserStatus};

/// `GetUser` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetUserRequest {
    pub id: u32,
}

/// `DeleteUser` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    pub id: u32,
}

/// `UpdateUser` request.
///
/// An empty `update_mask` replaces every mutable field; otherwise only the
/// named top-level paths are copied from `user`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub user: Option<User>,
    #[serde(default)]
    pub update_mask: Vec<String>,
}

/// `ListUsers` request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListUsersRequest {
    /// Only users created at or after this instant.
    pub created_since: Option<DateTime<Utc>>,
    /// Only users created more than this long ago.
    pub older_than: Option<Duration>,
    pub status: Option<UserStatus>,
    /// Zero means unlimited.
    #[serde(default)]
    pub page_size: u32,
    pub page_token: Option<String>,
}

/// `ListUsersByRole` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleRequest {
    pub role: Role,
}

/// Aggregate result of a `BatchAddUsers` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchAddUsersResponse {
    pub total_received: u32,
    pub total_added: u32,
    pub total_failed: u32,
    /// One entry per failed item, in arrival order.
    pub errors: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

/// Kind of user activity reported on the activity stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityType {
    Login,
    Logout,
    UpdateProfile,
    ViewPage,
}

impl ActivityType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Logout => "LOGOUT",
            Self::UpdateProfile => "UPDATE_PROFILE",
            Self::ViewPage => "VIEW_PAGE",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound item on the activity stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivity {
    pub user_id: u32,
    pub activity_type: ActivityType,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

/// Acknowledgement for one [`UserActivity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserActivityResponse {
    pub user_id: u32,
    pub acknowledged: bool,
    pub message: String,
    pub processed_at: DateTime<Utc>,
}

/// Outcome of syncing one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Success,
    Failed,
}

/// Response for one inbound user on the sync stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUserResponse {
    pub user_id: u32,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub updated_fields: Vec<String>,
}
