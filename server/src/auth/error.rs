//! Authentication and Authorization Error Types

use thiserror::Error;

/// Credential failures raised by the authentication stage.
///
/// Messages are fixed per variant; neither the presented token nor the
/// underlying decoder error is ever echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The call carried no metadata at all.
    #[error("Missing metadata")]
    MissingMetadata,

    /// Missing `authorization` metadata entry.
    #[error("Missing authorization header")]
    MissingAuthHeader,

    /// Header present but not of the form `Bearer <token>`.
    #[error("Invalid authorization header format, expected 'Bearer <token>'")]
    InvalidAuthHeader,

    /// Nothing after the `Bearer ` prefix.
    #[error("Empty token")]
    EmptyToken,

    /// Signature does not verify against the configured secret.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Not a structurally valid token.
    #[error("Malformed token")]
    MalformedToken,

    /// Header names an algorithm other than the configured one.
    #[error("Unsupported token algorithm")]
    UnsupportedAlgorithm,

    /// Signature valid, `exp` in the past.
    #[error("Token expired")]
    TokenExpired,

    /// Issuer, subject or validity window rejected.
    #[error("Invalid token claims")]
    InvalidClaims,

    /// Called a role-guarded operation without an authenticated identity.
    #[error("No authentication claims found")]
    NoClaims,

    /// Signing failed while issuing a token.
    #[error("Internal server error")]
    Internal(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::UnsupportedAlgorithm
            }
            ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::InvalidAudience
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::InvalidClaims,
            _ => Self::MalformedToken,
        }
    }
}

/// Result type for auth operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Authorization failures raised after a caller has been authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    /// A policy rule matched and the caller does not satisfy it.
    #[error("access to {method} denied")]
    Denied { method: String },

    /// No rule covers the method under a fail-closed policy.
    #[error("no authorization rule covers {method}")]
    Unmatched { method: String },

    /// The policy has not loaded its first snapshot yet.
    #[error("authorization policy not loaded")]
    NotLoaded,

    /// Caller holds none of the listed roles.
    #[error("insufficient permissions, required roles: {required}")]
    MissingRole { required: String },
}
