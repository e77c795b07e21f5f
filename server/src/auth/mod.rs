//! Authentication and Authorization
//!
//! Bearer-token validation, the per-call claims it produces, and the
//! method approval policies consulted after a caller is authenticated.

mod approver;
mod error;
pub mod jwt;
mod middleware;
mod snapshot;

pub use approver::{MethodApprover, Rule, StaticApprover};
pub use error::{AuthError, AuthResult, PermissionError};
pub use jwt::{Claims, Identity, TokenManager};
pub use middleware::{authenticate, bearer_token, require_role, AUTHORIZATION};
pub use snapshot::{AuthzSnapshot, SnapshotApprover};
