//! Shared Types

mod requests;
mod user;

pub use requests::*;
pub use user::*;
