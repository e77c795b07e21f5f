//! Roster Common Library
//!
//! Shared types used by both the server and its clients: the user model and
//! the request/response payloads of every `UserService` call.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
