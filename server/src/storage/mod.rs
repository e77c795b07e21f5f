//! User Storage
//!
//! The call handlers depend only on [`UserStorage`]. Two engines implement
//! it: [`MemoryStorage`] (reference engine, one lock over the whole key
//! space) and [`PostgresStorage`] (single-statement atomicity per entity).
//!
//! Engines never merge partial updates; `update` receives a fully merged
//! entity. Enumeration returns an empty vector when nothing matches.

mod memory;
mod postgres;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use roster_common::{Role, User, UserStatus};
use thiserror::Error;

pub use memory::MemoryStorage;
pub use postgres::{create_pool, run_migrations, PostgresStorage};

/// Storage failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("user with ID {0} not found")]
    NotFound(u32),

    #[error("user with ID {0} already exists")]
    AlreadyExists(u32),

    /// Another user already holds this username.
    #[error("username {0} already exists")]
    UsernameTaken(String),

    /// Caller-supplied input the engine cannot interpret (e.g. a bad page token).
    #[error("{0}")]
    InvalidArgument(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back to a user.
    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Enumeration filter. Every supplied predicate must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Created at or after this instant.
    pub created_since: Option<DateTime<Utc>>,
    /// Created strictly before this instant.
    pub older_than: Option<DateTime<Utc>>,
    pub status: Option<UserStatus>,
    /// Maximum number of users returned; zero means unlimited.
    pub page_size: u32,
    /// Resume after the position encoded by a previous [`page_token_after`].
    pub page_token: Option<String>,
}

impl ListFilter {
    /// Whether `user` passes the predicates (pagination excluded).
    pub fn matches(&self, user: &User) -> bool {
        if let Some(since) = self.created_since {
            if user.create_date.map_or(true, |created| created < since) {
                return false;
            }
        }

        if let Some(before) = self.older_than {
            if user.create_date.map_or(true, |created| created >= before) {
                return false;
            }
        }

        if let Some(status) = self.status {
            if user.status != Some(status) {
                return false;
            }
        }

        true
    }

    /// Decoded cursor: only ids strictly greater than this are returned.
    pub fn cursor(&self) -> StorageResult<Option<u32>> {
        self.page_token.as_deref().map(decode_page_token).transpose()
    }

    /// Page size as a limit, `None` when unlimited.
    pub fn limit(&self) -> Option<usize> {
        (self.page_size > 0).then_some(self.page_size as usize)
    }
}

const PAGE_TOKEN_PREFIX: &str = "after:";

/// Opaque token resuming enumeration after the user `id`.
pub fn page_token_after(id: u32) -> String {
    URL_SAFE_NO_PAD.encode(format!("{PAGE_TOKEN_PREFIX}{id}"))
}

fn decode_page_token(token: &str) -> StorageResult<u32> {
    let invalid = || StorageError::InvalidArgument("invalid page token".into());

    let raw = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
    let raw = String::from_utf8(raw).map_err(|_| invalid())?;
    raw.strip_prefix(PAGE_TOKEN_PREFIX)
        .and_then(|id| id.parse().ok())
        .ok_or_else(invalid)
}

/// User storage engine.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Store a new user. Assigns `create_date` and an ACTIVE status when unset.
    async fn add(&self, user: User) -> StorageResult<()>;

    async fn get(&self, id: u32) -> StorageResult<User>;

    /// Replace an existing user with `user`.
    async fn update(&self, user: User) -> StorageResult<()>;

    async fn delete(&self, id: u32) -> StorageResult<()>;

    /// Users passing `filter`, ordered by id.
    async fn list(&self, filter: &ListFilter) -> StorageResult<Vec<User>>;

    /// Users holding `role`, ordered by id.
    async fn list_by_role(&self, role: Role) -> StorageResult<Vec<User>>;

    async fn exists(&self, id: u32) -> StorageResult<bool>;

    async fn count(&self) -> StorageResult<usize>;
}

/// Apply the server-assigned defaults of a newly added user.
pub(crate) fn with_add_defaults(mut user: User) -> User {
    user.create_date.get_or_insert_with(Utc::now);
    user.status.get_or_insert(UserStatus::Active);
    user
}
