//! Roster Server
//!
//! User directory behind an authenticated, observable RPC pipeline. A
//! transport binds to [`service::RosterServer`]; every call passes the
//! logging, metrics and auth stages of [`pipeline::Pipeline`] before it
//! reaches the handlers, which persist through [`storage::UserStorage`].

pub mod auth;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod storage;
