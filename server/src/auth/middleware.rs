//! Authentication Stage
//!
//! Extracts the bearer credential from call metadata and validates it.

use roster_common::Role;
use tonic::metadata::MetadataMap;

use super::error::{AuthError, AuthResult, PermissionError};
use super::jwt::{Claims, TokenManager};
use crate::error::ServiceResult;
use crate::pipeline::CallContext;

/// Metadata key carrying the credential.
pub const AUTHORIZATION: &str = "authorization";

const BEARER_PREFIX: &str = "Bearer ";

/// Extract the bearer token from call metadata.
pub fn bearer_token(metadata: Option<&MetadataMap>) -> AuthResult<&str> {
    let metadata = metadata.ok_or(AuthError::MissingMetadata)?;

    let header = metadata
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::InvalidAuthHeader)?;

    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }

    Ok(token)
}

/// Validate the credential carried in `metadata`.
pub fn authenticate(metadata: Option<&MetadataMap>, tokens: &TokenManager) -> AuthResult<Claims> {
    let token = bearer_token(metadata)?;
    tokens.validate_token(token)
}

/// Require the caller to hold at least one of `roles`.
///
/// Fails Unauthenticated when the call carries no claims (for instance
/// when the auth stage is disabled) and `PermissionDenied` otherwise.
pub fn require_role(ctx: &CallContext, roles: &[Role]) -> ServiceResult<()> {
    let claims = ctx.claims().ok_or(AuthError::NoClaims)?;

    if roles.iter().any(|role| claims.has_role(role.as_str())) {
        return Ok(());
    }

    Err(PermissionError::MissingRole {
        required: roles
            .iter()
            .map(Role::as_str)
            .collect::<Vec<_>>()
            .join(", "),
    }
    .into())
}
