//! Snapshot Authorization Policy
//!
//! Grants are computed in one batch from storage and swapped in atomically,
//! so approving a call never touches storage. A stored user's grants follow
//! their stored role and status, overriding whatever roles their token
//! carries. Callers unknown to the snapshot fall back to the role grants of
//! their token.
//!
//! Fails closed: no snapshot, an unknown method, or a method outside the
//! caller's grants are all denied.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use roster_common::{Role, User, UserStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::approver::MethodApprover;
use super::error::PermissionError;
use super::jwt::Claims;
use crate::service::Method;
use crate::storage::{ListFilter, StorageError, UserStorage};

/// Precomputed grants.
#[derive(Debug, Clone, Default)]
pub struct AuthzSnapshot {
    by_user: HashMap<String, BTreeSet<Method>>,
    by_role: HashMap<String, BTreeSet<Method>>,
    built_at: Option<DateTime<Utc>>,
}

impl AuthzSnapshot {
    /// Build grants for `users`. Users that are not active get none.
    pub fn build(users: &[User]) -> Self {
        let by_role: HashMap<String, BTreeSet<Method>> = Role::all()
            .iter()
            .map(|role| {
                (
                    role.as_str().to_string(),
                    Method::granted_to(*role).iter().copied().collect(),
                )
            })
            .collect();

        let by_user = users
            .iter()
            .map(|user| {
                let active = user.status.unwrap_or(UserStatus::Active) == UserStatus::Active;
                let grants = if active {
                    by_role.get(user.role.as_str()).cloned().unwrap_or_default()
                } else {
                    BTreeSet::new()
                };
                (user.id.to_string(), grants)
            })
            .collect();

        Self {
            by_user,
            by_role,
            built_at: Some(Utc::now()),
        }
    }

    /// Number of users with an explicit grant entry.
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub const fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    fn allows(&self, method: Method, claims: &Claims) -> bool {
        if let Some(grants) = self.by_user.get(claims.user_id()) {
            return grants.contains(&method);
        }

        claims.roles().iter().any(|role| {
            self.by_role
                .get(role)
                .is_some_and(|grants| grants.contains(&method))
        })
    }
}

/// Approver backed by a periodically refreshed [`AuthzSnapshot`].
#[derive(Debug, Default)]
pub struct SnapshotApprover {
    snapshot: ArcSwapOption<AuthzSnapshot>,
}

impl SnapshotApprover {
    /// Create an approver with no snapshot loaded; every call is denied
    /// until the first [`refresh`](Self::refresh).
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot, if loaded.
    pub fn current(&self) -> Option<Arc<AuthzSnapshot>> {
        self.snapshot.load_full()
    }

    /// Replace the snapshot.
    pub fn install(&self, snapshot: AuthzSnapshot) {
        self.snapshot.store(Some(Arc::new(snapshot)));
    }

    /// Rebuild the snapshot from every stored user.
    ///
    /// On failure the previous snapshot stays in place.
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, storage: &dyn UserStorage) -> Result<usize, StorageError> {
        let users = storage.list(&ListFilter::default()).await?;
        let snapshot = AuthzSnapshot::build(&users);
        let count = snapshot.user_count();
        self.install(snapshot);

        tracing::info!(users = count, "Authorization snapshot refreshed");
        Ok(count)
    }

    /// Start the periodic refresh background task.
    ///
    /// The first tick is consumed immediately; callers are expected to have
    /// run one refresh at startup. The task exits when `shutdown` fires.
    pub fn spawn_refresh(
        self: Arc<Self>,
        storage: Arc<dyn UserStorage>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = self.refresh(storage.as_ref()).await {
                            tracing::warn!(error = %e, "Authorization snapshot refresh failed, keeping previous");
                        }
                    }
                }
            }
            tracing::debug!("Authorization snapshot refresher stopped");
        })
    }
}

impl MethodApprover for SnapshotApprover {
    fn approve(&self, method: &str, claims: &Claims) -> Result<(), PermissionError> {
        let guard = self.snapshot.load();
        let Some(snapshot) = &*guard else {
            return Err(PermissionError::NotLoaded);
        };

        let Some(known) = Method::from_full_name(method) else {
            return Err(PermissionError::Unmatched {
                method: method.to_string(),
            });
        };

        if snapshot.allows(known, claims) {
            Ok(())
        } else {
            Err(PermissionError::Denied {
                method: method.to_string(),
            })
        }
    }
}
