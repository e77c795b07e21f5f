//! Field-Mask Merge
//!
//! Partial updates name top-level fields from a fixed vocabulary. The whole
//! mask is validated before anything is copied, so a bad path leaves the
//! target untouched.

use std::fmt;
use std::str::FromStr;

use roster_common::User;

use crate::error::ServiceError;

/// Mutable top-level user field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldPath {
    Role,
    Username,
    Email,
    Phone,
    Profile,
    Tags,
    Metadata,
    Status,
    LastLogin,
    Addresses,
}

impl FieldPath {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Username => "username",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::Profile => "profile",
            Self::Tags => "tags",
            Self::Metadata => "metadata",
            Self::Status => "status",
            Self::LastLogin => "last_login",
            Self::Addresses => "addresses",
        }
    }

    /// Every mutable field, i.e. what an empty mask replaces.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Role,
            Self::Username,
            Self::Email,
            Self::Phone,
            Self::Profile,
            Self::Tags,
            Self::Metadata,
            Self::Status,
            Self::LastLogin,
            Self::Addresses,
        ]
    }

    /// Copy this field from `patch` onto `target`.
    fn copy(self, target: &mut User, patch: &User) {
        match self {
            Self::Role => target.role = patch.role,
            Self::Username => target.username.clone_from(&patch.username),
            Self::Email => target.email.clone_from(&patch.email),
            Self::Phone => target.phone.clone_from(&patch.phone),
            Self::Profile => target.profile.clone_from(&patch.profile),
            Self::Tags => target.tags.clone_from(&patch.tags),
            Self::Metadata => target.metadata.clone_from(&patch.metadata),
            Self::Status => target.status = patch.status,
            Self::LastLogin => target.last_login = patch.last_login,
            Self::Addresses => target.addresses.clone_from(&patch.addresses),
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldPath {
    type Err = ServiceError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        if path == "id" {
            return Err(ServiceError::invalid_argument("cannot update id field"));
        }

        Self::all()
            .iter()
            .copied()
            .find(|field| field.as_str() == path)
            .ok_or_else(|| ServiceError::invalid_argument(format!("invalid field path: {path}")))
    }
}

/// Parse every path of a mask, failing on the first invalid one.
pub fn parse_mask<S: AsRef<str>>(paths: &[S]) -> Result<Vec<FieldPath>, ServiceError> {
    paths.iter().map(|path| path.as_ref().parse()).collect()
}

/// Merge `patch` onto `existing`.
///
/// An empty mask replaces every mutable field; `id` and `create_date` are
/// always kept from `existing`.
pub fn merge<S: AsRef<str>>(existing: &User, patch: &User, mask: &[S]) -> Result<User, ServiceError> {
    let fields = if mask.is_empty() {
        FieldPath::all().to_vec()
    } else {
        parse_mask(mask)?
    };

    let mut merged = existing.clone();
    for field in fields {
        field.copy(&mut merged, patch);
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use roster_common::{Profile, Role, UserStatus};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::error::ErrorKind;

    fn existing() -> User {
        User {
            status: Some(UserStatus::Active),
            email: Some("bob@example.com".into()),
            tags: vec!["one".into()],
            metadata: HashMap::from([("k".to_string(), "v".to_string())]),
            create_date: Some(Utc::now()),
            ..User::new(2, "bob", Role::Member)
        }
    }

    fn patch() -> User {
        User {
            status: Some(UserStatus::Suspended),
            profile: Some(Profile {
                display_name: "Robert".into(),
                ..Profile::default()
            }),
            ..User::new(99, "robert", Role::Admin)
        }
    }

    #[test]
    fn test_single_path_changes_only_that_field() {
        let before = existing();
        let merged = merge(&before, &patch(), &["username"]).unwrap();

        let mut expected = before;
        expected.username = "robert".into();
        assert_eq!(merged, expected);
    }

    #[test]
    fn test_empty_mask_replaces_all_but_identity() {
        let before = existing();
        let merged = merge::<&str>(&before, &patch(), &[]).unwrap();

        assert_eq!(merged.id, 2);
        assert_eq!(merged.create_date, before.create_date);
        assert_eq!(merged.username, "robert");
        assert_eq!(merged.role, Role::Admin);
        assert_eq!(merged.status, Some(UserStatus::Suspended));
        assert!(merged.email.is_none());
        assert!(merged.tags.is_empty());
    }

    #[test]
    fn test_id_path_rejected() {
        let err = merge(&existing(), &patch(), &["status", "id"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "cannot update id field");
    }

    #[test]
    fn test_unknown_path_rejected() {
        let err = merge(&existing(), &patch(), &["create_date"]).unwrap_err();
        assert_eq!(err.to_string(), "invalid field path: create_date");

        let err = merge(&existing(), &patch(), &["profile.bio"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_every_path_parses() {
        for field in FieldPath::all() {
            assert_eq!(assert_ok!(field.as_str().parse::<FieldPath>()), *field);
        }
        assert_err!("Username".parse::<FieldPath>());
    }
}
