//! In-Memory Storage Engine
//!
//! Mutations take the write lock over the whole key space, reads take the
//! read lock. Users are cloned on the way in and on the way out, so no
//! caller ever holds a reference into the map.

use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use roster_common::{Role, User};
use tokio::sync::RwLock;

use super::{with_add_defaults, ListFilter, StorageError, StorageResult, UserStorage};

/// Fail when a user other than `id` already holds `username`.
fn ensure_username_free(users: &BTreeMap<u32, User>, id: u32, username: &str) -> StorageResult<()> {
    if users
        .values()
        .any(|other| other.id != id && other.username == username)
    {
        return Err(StorageError::UsernameTaken(username.to_string()));
    }
    Ok(())
}

/// Reference storage engine backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    users: RwLock<BTreeMap<u32, User>>,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStorage for MemoryStorage {
    async fn add(&self, user: User) -> StorageResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(StorageError::AlreadyExists(user.id));
        }
        ensure_username_free(&users, user.id, &user.username)?;

        users.insert(user.id, with_add_defaults(user));
        Ok(())
    }

    async fn get(&self, id: u32) -> StorageResult<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound(id))
    }

    async fn update(&self, user: User) -> StorageResult<()> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(StorageError::NotFound(user.id));
        }
        ensure_username_free(&users, user.id, &user.username)?;
        users.insert(user.id, user);
        Ok(())
    }

    async fn delete(&self, id: u32) -> StorageResult<()> {
        self.users
            .write()
            .await
            .remove(&id)
            .map(drop)
            .ok_or(StorageError::NotFound(id))
    }

    async fn list(&self, filter: &ListFilter) -> StorageResult<Vec<User>> {
        let cursor = filter.cursor()?;
        let users = self.users.read().await;

        let matching = users
            .range((cursor.map_or(Bound::Unbounded, Bound::Excluded), Bound::Unbounded))
            .map(|(_, user)| user)
            .filter(|user| filter.matches(user))
            .cloned();

        Ok(match filter.limit() {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    async fn list_by_role(&self, role: Role) -> StorageResult<Vec<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.role == role)
            .cloned()
            .collect())
    }

    async fn exists(&self, id: u32) -> StorageResult<bool> {
        Ok(self.users.read().await.contains_key(&id))
    }

    async fn count(&self) -> StorageResult<usize> {
        Ok(self.users.read().await.len())
    }
}
