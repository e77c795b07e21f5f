//! User Types

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Unprivileged visitor.
    #[default]
    Guest,
    /// Regular member.
    Member,
    /// Full administrative access.
    Admin,
    /// Content moderator.
    Moderator,
}

impl Role {
    /// Canonical upper-case name, as carried in token role claims.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "GUEST",
            Self::Member => "MEMBER",
            Self::Admin => "ADMIN",
            Self::Moderator => "MODERATOR",
        }
    }

    /// Numeric code used by the persistent engine.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Guest => 0,
            Self::Member => 1,
            Self::Admin => 2,
            Self::Moderator => 3,
        }
    }

    /// Inverse of [`Role::code`].
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Guest),
            1 => Some(Self::Member),
            2 => Some(Self::Admin),
            3 => Some(Self::Moderator),
            _ => None,
        }
    }

    /// Returns all roles.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Guest, Self::Member, Self::Admin, Self::Moderator]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    /// Case-insensitive parse of a role name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownVariant {
                kind: "role",
                value: s.to_string(),
            })
    }
}

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    /// Account exists but has not been activated.
    Inactive,
    /// Account in good standing.
    Active,
    /// Temporarily blocked.
    Suspended,
    /// Soft-deleted.
    Deleted,
}

impl UserStatus {
    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "INACTIVE",
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Deleted => "DELETED",
        }
    }

    /// Numeric code used by the persistent engine.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Inactive => 0,
            Self::Active => 1,
            Self::Suspended => 2,
            Self::Deleted => 3,
        }
    }

    /// Inverse of [`UserStatus::code`].
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Inactive),
            1 => Some(Self::Active),
            2 => Some(Self::Suspended),
            3 => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of postal address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressType {
    #[default]
    Home,
    Work,
    Other,
}

/// Postal address attached to a user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "type")]
    pub address_type: AddressType,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    /// At most one address should be primary; not enforced.
    pub is_primary: bool,
}

/// Public profile of a user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub bio: String,
    pub avatar_url: String,
    pub date_of_birth: Option<DateTime<Utc>>,
    /// Free-form integer preferences (e.g. `"theme" => 1`).
    pub preferences: HashMap<String, i32>,
}

/// User entity.
///
/// `id` is immutable once the user has been created. `create_date` is
/// assigned by storage when absent; `status` defaults to
/// [`UserStatus::Active`] when left unset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    /// User ID (positive, unique).
    pub id: u32,
    /// Username (unique).
    pub username: String,
    pub role: Role,
    pub status: Option<UserStatus>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub profile: Option<Profile>,
    /// Ordered tags.
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
    /// Ordered addresses.
    pub addresses: Vec<Address>,
    pub create_date: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// Create a user with the given identity and role; everything else empty.
    pub fn new(id: u32, username: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            username: username.into(),
            role,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_case_insensitive() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("MODERATOR".parse::<Role>().unwrap(), Role::Moderator);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_codes_round_trip() {
        for role in Role::all() {
            assert_eq!(Role::from_code(role.code()), Some(*role));
        }
        assert_eq!(UserStatus::from_code(2), Some(UserStatus::Suspended));
        assert_eq!(UserStatus::from_code(9), None);
    }

    #[test]
    fn test_user_serializes_with_upper_case_enums() {
        let user = User::new(1, "admin", Role::Admin);
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["role"], "ADMIN");
        assert_eq!(json["status"], serde_json::Value::Null);
    }
}
