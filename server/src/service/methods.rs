//! Fully-qualified RPC method names of the `UserService`.

use roster_common::Role;

/// Service path prefix shared by every method.
pub const SERVICE: &str = "/roster.v1.UserService";

/// One RPC of the `UserService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    AddUser,
    GetUser,
    UpdateUser,
    DeleteUser,
    ListUsers,
    ListUsersByRole,
    BatchAddUsers,
    UserActivityStream,
    SyncUsers,
}

impl Method {
    /// Fully-qualified method name, as seen by interceptors.
    ///
    /// ```
    /// use roster_server::service::Method;
    ///
    /// assert_eq!(Method::GetUser.full_name(), "/roster.v1.UserService/GetUser");
    /// ```
    #[must_use]
    pub const fn full_name(&self) -> &'static str {
        match self {
            Self::AddUser => "/roster.v1.UserService/AddUser",
            Self::GetUser => "/roster.v1.UserService/GetUser",
            Self::UpdateUser => "/roster.v1.UserService/UpdateUser",
            Self::DeleteUser => "/roster.v1.UserService/DeleteUser",
            Self::ListUsers => "/roster.v1.UserService/ListUsers",
            Self::ListUsersByRole => "/roster.v1.UserService/ListUsersByRole",
            Self::BatchAddUsers => "/roster.v1.UserService/BatchAddUsers",
            Self::UserActivityStream => "/roster.v1.UserService/UserActivityStream",
            Self::SyncUsers => "/roster.v1.UserService/SyncUsers",
        }
    }

    /// Returns all methods.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::AddUser,
            Self::GetUser,
            Self::UpdateUser,
            Self::DeleteUser,
            Self::ListUsers,
            Self::ListUsersByRole,
            Self::BatchAddUsers,
            Self::UserActivityStream,
            Self::SyncUsers,
        ]
    }

    /// Look up a method by its fully-qualified name.
    #[must_use]
    pub fn from_full_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|m| m.full_name() == name)
    }

    /// Methods granted to `role` under the snapshot policy.
    #[must_use]
    pub const fn granted_to(role: Role) -> &'static [Self] {
        match role {
            Role::Guest => &[Self::GetUser],
            Role::Member => &[Self::GetUser, Self::ListUsers, Self::UserActivityStream],
            Role::Moderator => &[
                Self::GetUser,
                Self::ListUsers,
                Self::ListUsersByRole,
                Self::UpdateUser,
                Self::UserActivityStream,
            ],
            Role::Admin => Self::all(),
        }
    }
}
