//! Common Error Types

use thiserror::Error;

/// Errors produced while interpreting shared types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A string did not name any variant of the enum.
    #[error("unknown {kind}: {value}")]
    UnknownVariant {
        /// Name of the enum being parsed.
        kind: &'static str,
        /// Rejected input.
        value: String,
    },
}

/// Result alias for common operations.
pub type Result<T> = std::result::Result<T, Error>;
