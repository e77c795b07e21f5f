//! `UserService` Call Handlers
//!
//! Handlers see only the [`UserStorage`] interface. Storage errors pass
//! through with their kind intact; per-item failures inside batch and sync
//! streams are reported in the responses instead of ending the stream.

use std::sync::Arc;

use chrono::Utc;
use roster_common::{
    ActivityType, BatchAddUsersResponse, DeleteUserRequest, GetUserRequest, ListUsersRequest,
    Role, SyncStatus, SyncUserResponse, UpdateUserRequest, User, UserActivity,
    UserActivityResponse, UserRoleRequest,
};
use tracing::{debug, error, info};

use super::mask;
use crate::error::{ServiceError, ServiceResult};
use crate::pipeline::{BidiStream, CallContext, CallStream, ClientStream, ServerStream};
use crate::storage::{ListFilter, StorageError, UserStorage};

/// Fields reported for a user updated by `SyncUsers`.
pub const SYNC_UPDATED_FIELDS: [&str; 4] = ["role", "username", "profile", "status"];

/// Field reported for a user created by `SyncUsers`.
pub const SYNC_CREATED_FIELD: &str = "created";

const ID_REQUIRED: &str = "user ID must be greater than 0";
const FIRST_USER_ADMIN: &str = "first user created must be an admin";

/// Fail with Cancelled once the caller has gone away.
fn ensure_live(ctx: &CallContext) -> ServiceResult<()> {
    if ctx.is_cancelled() {
        return Err(ServiceError::Cancelled);
    }
    Ok(())
}

/// Handler logic for every `UserService` call.
#[derive(Clone)]
pub struct UserService {
    storage: Arc<dyn UserStorage>,
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService").finish_non_exhaustive()
    }
}

impl UserService {
    pub fn new(storage: Arc<dyn UserStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn UserStorage> {
        &self.storage
    }

    /// The first user of an empty store must be an admin.
    async fn check_bootstrap(&self, user: &User) -> ServiceResult<()> {
        let count = self.storage.count().await.map_err(|e| {
            error!(error = %e, "Failed to check user count");
            ServiceError::internal("failed to check user count")
        })?;

        if count == 0 && user.role != Role::Admin {
            return Err(ServiceError::invalid_argument(FIRST_USER_ADMIN));
        }
        Ok(())
    }

    /// Validate and store one new user.
    async fn create(&self, user: User) -> ServiceResult<()> {
        self.check_bootstrap(&user).await?;

        if user.id == 0 {
            return Err(ServiceError::invalid_argument(ID_REQUIRED));
        }
        if user.username.is_empty() {
            return Err(ServiceError::invalid_argument("username is required"));
        }

        self.storage.add(user).await?;
        Ok(())
    }

    pub async fn add_user(&self, ctx: &CallContext, user: User) -> ServiceResult<()> {
        ensure_live(ctx)?;
        let id = user.id;
        self.create(user).await?;
        info!(user_id = id, "User added");
        Ok(())
    }

    pub async fn get_user(&self, ctx: &CallContext, req: GetUserRequest) -> ServiceResult<User> {
        ensure_live(ctx)?;
        if req.id == 0 {
            return Err(ServiceError::invalid_argument(ID_REQUIRED));
        }

        Ok(self.storage.get(req.id).await?)
    }

    /// Merge the request onto the stored user and write the result back.
    pub async fn update_user(
        &self,
        ctx: &CallContext,
        req: UpdateUserRequest,
    ) -> ServiceResult<User> {
        let patch = req
            .user
            .ok_or_else(|| ServiceError::invalid_argument("user is required"))?;
        if patch.id == 0 {
            return Err(ServiceError::invalid_argument(ID_REQUIRED));
        }

        ensure_live(ctx)?;
        let existing = self.storage.get(patch.id).await?;
        let merged = mask::merge(&existing, &patch, &req.update_mask)?;

        ensure_live(ctx)?;
        self.storage.update(merged.clone()).await?;

        debug!(user_id = merged.id, paths = ?req.update_mask, "User updated");
        Ok(merged)
    }

    pub async fn delete_user(&self, ctx: &CallContext, req: DeleteUserRequest) -> ServiceResult<()> {
        ensure_live(ctx)?;
        if req.id == 0 {
            return Err(ServiceError::invalid_argument(ID_REQUIRED));
        }

        self.storage.delete(req.id).await?;
        info!(user_id = req.id, "User deleted");
        Ok(())
    }

    /// Stream every user matching the request filter, in id order.
    ///
    /// To fetch the next page, pass `page_token_after(last_id)` as the
    /// request's `page_token`.
    pub async fn list_users(
        &self,
        stream: ServerStream<User>,
        req: ListUsersRequest,
    ) -> ServiceResult<()> {
        let older_than = req
            .older_than
            .map(|age| {
                chrono::Duration::from_std(age)
                    .ok()
                    .and_then(|age| Utc::now().checked_sub_signed(age))
                    .ok_or_else(|| ServiceError::invalid_argument("older_than out of range"))
            })
            .transpose()?;

        let filter = ListFilter {
            created_since: req.created_since,
            older_than,
            status: req.status,
            page_size: req.page_size,
            page_token: req.page_token,
        };

        ensure_live(stream.context())?;
        let users = self.storage.list(&filter).await?;
        if users.is_empty() {
            return Err(ServiceError::not_found("no users found"));
        }

        send_all(&stream, users).await
    }

    /// Stream every user holding the requested role.
    pub async fn list_users_by_role(
        &self,
        stream: ServerStream<User>,
        req: UserRoleRequest,
    ) -> ServiceResult<()> {
        ensure_live(stream.context())?;
        let users = self.storage.list_by_role(req.role).await?;
        if users.is_empty() {
            return Err(ServiceError::not_found(format!(
                "no users found with role {}",
                req.role
            )));
        }

        send_all(&stream, users).await
    }

    /// Add every inbound user, collecting per-item failures.
    pub async fn batch_add_users(
        &self,
        mut stream: ClientStream<User>,
    ) -> ServiceResult<BatchAddUsersResponse> {
        let mut total_received = 0u32;
        let mut total_added = 0u32;
        let mut errors = Vec::new();

        while let Some(user) = stream.recv().await? {
            total_received += 1;
            ensure_live(stream.context())?;

            match self.create(user).await {
                Ok(()) => total_added += 1,
                Err(ServiceError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => errors.push(batch_error(total_received, &e)),
            }
        }

        let total_failed = total_received - total_added;
        info!(total_received, total_added, total_failed, "Batch add finished");

        Ok(BatchAddUsersResponse {
            total_received,
            total_added,
            total_failed,
            errors,
            processed_at: Utc::now(),
        })
    }

    /// Acknowledge each activity event before reading the next one.
    pub async fn user_activity_stream(
        &self,
        mut stream: BidiStream<UserActivity, UserActivityResponse>,
    ) -> ServiceResult<()> {
        while let Some(activity) = stream.recv().await? {
            ensure_live(stream.context())?;
            let response = self.record_activity(&activity).await?;
            stream.send(response).await?;
        }
        Ok(())
    }

    async fn record_activity(&self, activity: &UserActivity) -> ServiceResult<UserActivityResponse> {
        let user_id = activity.user_id;
        let exists = self.storage.exists(user_id).await?;

        if !exists {
            return Ok(UserActivityResponse {
                user_id,
                acknowledged: false,
                message: format!("User {user_id} not found"),
                processed_at: Utc::now(),
            });
        }

        if activity.activity_type == ActivityType::Login {
            let at = activity.timestamp.unwrap_or_else(Utc::now);
            if let Err(e) = self.touch_last_login(user_id, at).await {
                error!(user_id, error = %e, "Failed to update last login");
            }
        }

        Ok(UserActivityResponse {
            user_id,
            acknowledged: true,
            message: format!(
                "Activity {} recorded for user {user_id}",
                activity.activity_type
            ),
            processed_at: Utc::now(),
        })
    }

    async fn touch_last_login(
        &self,
        user_id: u32,
        at: chrono::DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut user = self.storage.get(user_id).await?;
        user.last_login = Some(at);
        self.storage.update(user).await
    }

    /// Upsert each inbound user and answer with one response per item.
    pub async fn sync_users(
        &self,
        mut stream: BidiStream<User, SyncUserResponse>,
    ) -> ServiceResult<()> {
        while let Some(user) = stream.recv().await? {
            ensure_live(stream.context())?;
            let user_id = user.id;

            let response = match self.sync_one(user).await {
                Ok(updated_fields) => SyncUserResponse {
                    user_id,
                    status: SyncStatus::Success,
                    error_message: None,
                    updated_fields,
                },
                Err(ServiceError::Cancelled) => return Err(ServiceError::Cancelled),
                Err(e) => SyncUserResponse {
                    user_id,
                    status: SyncStatus::Failed,
                    error_message: Some(e.to_string()),
                    updated_fields: Vec::new(),
                },
            };

            stream.send(response).await?;
        }
        Ok(())
    }

    /// Update the user when it exists, create it otherwise.
    async fn sync_one(&self, mut user: User) -> ServiceResult<Vec<String>> {
        if user.id == 0 {
            return Err(ServiceError::invalid_argument(ID_REQUIRED));
        }

        match self.storage.get(user.id).await {
            Ok(existing) => {
                if user.create_date.is_none() {
                    user.create_date = existing.create_date;
                }
                self.storage.update(user).await?;
                Ok(SYNC_UPDATED_FIELDS.iter().map(ToString::to_string).collect())
            }
            Err(StorageError::NotFound(_)) => {
                self.create(user).await?;
                Ok(vec![SYNC_CREATED_FIELD.to_string()])
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn send_all(stream: &ServerStream<User>, users: Vec<User>) -> ServiceResult<()> {
    for user in users {
        ensure_live(stream.context())?;
        stream.send(user).await?;
    }
    Ok(())
}

/// Per-item batch error text; `position` is 1-based.
fn batch_error(position: u32, err: &ServiceError) -> String {
    match err {
        ServiceError::InvalidArgument(msg) if msg == ID_REQUIRED => {
            format!("user {position}: ID must be greater than 0")
        }
        _ => format!("user {position}: {err}"),
    }
}
