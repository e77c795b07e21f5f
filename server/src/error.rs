//! Call Outcome Errors
//!
//! Every failure that can end a call carries an [`ErrorKind`] for
//! programmatic branching plus a human-readable message. The conversion to
//! [`tonic::Status`] is the single place where kinds become transport codes.

use thiserror::Error;
use tonic::{Code, Status};

use crate::auth::{AuthError, PermissionError};
use crate::storage::StorageError;

/// Outcome taxonomy surfaced to the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Unauthenticated,
    PermissionDenied,
    Internal,
    /// Caller disconnected or the deadline expired.
    Cancelled,
}

impl ErrorKind {
    /// Transport status code for this kind.
    #[must_use]
    pub const fn code(self) -> Code {
        match self {
            Self::InvalidArgument => Code::InvalidArgument,
            Self::NotFound => Code::NotFound,
            Self::AlreadyExists => Code::AlreadyExists,
            Self::Unauthenticated => Code::Unauthenticated,
            Self::PermissionDenied => Code::PermissionDenied,
            Self::Internal => Code::Internal,
            Self::Cancelled => Code::Cancelled,
        }
    }

    /// Stable upper-snake name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Internal => "INTERNAL",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Error returned by handlers and by the interceptor chain.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing required input.
    #[error("{0}")]
    InvalidArgument(String),

    /// Entity (or any match) does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate key on create.
    #[error("{0}")]
    AlreadyExists(String),

    /// Credential missing, malformed, expired or forged.
    #[error(transparent)]
    Unauthenticated(#[from] AuthError),

    /// Authenticated but not allowed to call the method.
    #[error(transparent)]
    PermissionDenied(#[from] PermissionError),

    /// Backend failure unrelated to the caller's input.
    #[error("{0}")]
    Internal(String),

    /// Call abandoned before completion.
    #[error("call cancelled")]
    Cancelled,
}

impl ServiceError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Taxonomy kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::Unauthenticated(AuthError::Internal(_)) => ErrorKind::Internal,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => Self::NotFound(err.to_string()),
            StorageError::AlreadyExists(_) | StorageError::UsernameTaken(_) => {
                Self::AlreadyExists(err.to_string())
            }
            StorageError::InvalidArgument(_) => Self::InvalidArgument(err.to_string()),
            // Backend detail stays in the logs written by the engine.
            StorageError::Database(_) | StorageError::Corrupt(_) => {
                Self::Internal("storage backend failure".into())
            }
        }
    }
}

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        Self::new(err.kind().code(), err.to_string())
    }
}

/// Result type for call handlers.
pub type ServiceResult<T> = Result<T, ServiceError>;
