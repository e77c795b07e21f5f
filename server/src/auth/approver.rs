//! Method Approval
//!
//! Authorization runs after authentication and decides whether the
//! authenticated caller may invoke a fully-qualified method.
//!
//! Two policies exist and they disagree on methods no rule covers:
//!
//! - [`StaticApprover`] is a rule table for tests and bootstrapping. A method
//!   without a rule is **allowed**.
//! - [`SnapshotApprover`](super::SnapshotApprover) reads a precomputed
//!   per-user and per-role grant snapshot. A method without a grant is
//!   **denied**.

use roster_common::Role;

use super::error::PermissionError;
use super::jwt::Claims;
use crate::service::Method;

/// Authorization policy consulted by the auth stage.
pub trait MethodApprover: Send + Sync {
    /// Allow or deny `method` for the holder of `claims`.
    fn approve(&self, method: &str, claims: &Claims) -> Result<(), PermissionError>;
}

/// Single rule: calling `method` requires one of `roles`.
#[derive(Debug, Clone)]
pub struct Rule {
    pub method: Method,
    pub roles: Vec<Role>,
}

/// Rule-table approver. Fails open on unmatched methods.
#[derive(Debug, Clone)]
pub struct StaticApprover {
    rules: Vec<Rule>,
}

impl Default for StaticApprover {
    /// Mutations and bulk calls require ADMIN; role listing allows
    /// MODERATOR too. Everything else is open to any authenticated caller.
    fn default() -> Self {
        let admin = |method| Rule {
            method,
            roles: vec![Role::Admin],
        };

        Self::new(vec![
            admin(Method::AddUser),
            admin(Method::UpdateUser),
            admin(Method::DeleteUser),
            admin(Method::BatchAddUsers),
            admin(Method::SyncUsers),
            Rule {
                method: Method::ListUsersByRole,
                roles: vec![Role::Admin, Role::Moderator],
            },
        ])
    }
}

impl StaticApprover {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

impl MethodApprover for StaticApprover {
    fn approve(&self, method: &str, claims: &Claims) -> Result<(), PermissionError> {
        let Some(rule) = self
            .rules
            .iter()
            .find(|rule| rule.method.full_name() == method)
        else {
            return Ok(());
        };

        if rule.roles.iter().any(|role| claims.has_role(role.as_str())) {
            Ok(())
        } else {
            tracing::debug!(method, user_id = %claims.user_id(), "Static rule denied call");
            Err(PermissionError::Denied {
                method: method.to_string(),
            })
        }
    }
}
