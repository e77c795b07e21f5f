//! `UserService` Surface
//!
//! Method names, the field-mask merge, the call handlers, and the
//! dispatcher that binds them to the interceptor chain.

mod dispatcher;
mod handlers;
mod mask;
mod methods;

pub use dispatcher::{ResponseStream, RosterServer};
pub use handlers::{UserService, SYNC_CREATED_FIELD, SYNC_UPDATED_FIELDS};
pub use mask::{merge, parse_mask, FieldPath};
pub use methods::{Method, SERVICE};
