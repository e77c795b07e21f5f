//! Call Dispatcher
//!
//! [`RosterServer`] is the entry point a transport binds to. It builds the
//! [`CallContext`] for each call, runs the call through the [`Pipeline`],
//! and converts the outcome to [`tonic::Status`].
//!
//! Server-streaming and bidirectional calls run on a spawned task and hand
//! back the receiving half of the response channel. A failure ends that
//! channel with one `Err` item. Dropping the receiver cancels the call.

use std::future::Future;
use std::sync::Arc;

use futures::Stream;
use roster_common::{
    BatchAddUsersResponse, DeleteUserRequest, GetUserRequest, ListUsersRequest,
    SyncUserResponse, UpdateUserRequest, User, UserActivity, UserActivityResponse,
    UserRoleRequest,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::Status;

use super::handlers::UserService;
use super::methods::Method;
use crate::error::ServiceResult;
use crate::pipeline::{
    BidiStream, CallContext, CallKind, ClientStream, Inbound, Outbound, OutboundSender, Pipeline,
    ServerStream,
};

/// Receiving half of a streamed response.
pub type ResponseStream<T> = mpsc::Receiver<Result<T, Status>>;

/// `UserService` bound to its interceptor chain.
#[derive(Debug, Clone)]
pub struct RosterServer {
    pipeline: Arc<Pipeline>,
    service: Arc<UserService>,
    stream_buffer: usize,
    shutdown: CancellationToken,
}

impl RosterServer {
    pub fn new(pipeline: Arc<Pipeline>, service: Arc<UserService>, stream_buffer: usize) -> Self {
        Self {
            pipeline,
            service,
            stream_buffer: stream_buffer.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel every in-flight call when `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub const fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub const fn service(&self) -> &Arc<UserService> {
        &self.service
    }

    fn context(&self, method: Method, kind: CallKind, metadata: Option<MetadataMap>) -> CallContext {
        CallContext::new(method.full_name(), kind, metadata)
            .with_parent(&self.shutdown)
            .with_metadata_timeout()
    }

    pub async fn add_user(&self, metadata: Option<MetadataMap>, user: User) -> Result<(), Status> {
        let ctx = self.context(Method::AddUser, CallKind::Unary, metadata);
        self.pipeline
            .unary(ctx, user, |ctx, user| async move {
                self.service.add_user(&ctx, user).await
            })
            .await
            .map_err(Status::from)
    }

    pub async fn get_user(
        &self,
        metadata: Option<MetadataMap>,
        req: GetUserRequest,
    ) -> Result<User, Status> {
        let ctx = self.context(Method::GetUser, CallKind::Unary, metadata);
        self.pipeline
            .unary(ctx, req, |ctx, req| async move {
                self.service.get_user(&ctx, req).await
            })
            .await
            .map_err(Status::from)
    }

    pub async fn update_user(
        &self,
        metadata: Option<MetadataMap>,
        req: UpdateUserRequest,
    ) -> Result<User, Status> {
        let ctx = self.context(Method::UpdateUser, CallKind::Unary, metadata);
        self.pipeline
            .unary(ctx, req, |ctx, req| async move {
                self.service.update_user(&ctx, req).await
            })
            .await
            .map_err(Status::from)
    }

    pub async fn delete_user(
        &self,
        metadata: Option<MetadataMap>,
        req: DeleteUserRequest,
    ) -> Result<(), Status> {
        let ctx = self.context(Method::DeleteUser, CallKind::Unary, metadata);
        self.pipeline
            .unary(ctx, req, |ctx, req| async move {
                self.service.delete_user(&ctx, req).await
            })
            .await
            .map_err(Status::from)
    }

    pub fn list_users(
        &self,
        metadata: Option<MetadataMap>,
        req: ListUsersRequest,
    ) -> ResponseStream<User> {
        let ctx = self.context(Method::ListUsers, CallKind::ServerStreaming, metadata);
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let pipeline = Arc::clone(&self.pipeline);
        let service = Arc::clone(&self.service);
        let cancel = ctx.cancellation().clone();
        let stream = ServerStream::new(ctx, Outbound::new(tx.clone()));

        drive(tx, cancel, async move {
            pipeline
                .streaming(stream, |stream| service.list_users(stream, req))
                .await
        });
        rx
    }

    pub fn list_users_by_role(
        &self,
        metadata: Option<MetadataMap>,
        req: UserRoleRequest,
    ) -> ResponseStream<User> {
        let ctx = self.context(Method::ListUsersByRole, CallKind::ServerStreaming, metadata);
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let pipeline = Arc::clone(&self.pipeline);
        let service = Arc::clone(&self.service);
        let cancel = ctx.cancellation().clone();
        let stream = ServerStream::new(ctx, Outbound::new(tx.clone()));

        drive(tx, cancel, async move {
            pipeline
                .streaming(stream, |stream| service.list_users_by_role(stream, req))
                .await
        });
        rx
    }

    /// Consume every inbound user, then answer once.
    pub async fn batch_add_users(
        &self,
        metadata: Option<MetadataMap>,
        input: impl Stream<Item = Result<User, Status>> + Send + 'static,
    ) -> Result<BatchAddUsersResponse, Status> {
        let ctx = self.context(Method::BatchAddUsers, CallKind::ClientStreaming, metadata);
        let stream = ClientStream::new(ctx, Inbound::new(input));
        self.pipeline
            .streaming(stream, |stream| self.service.batch_add_users(stream))
            .await
            .map_err(Status::from)
    }

    pub fn user_activity_stream(
        &self,
        metadata: Option<MetadataMap>,
        input: impl Stream<Item = Result<UserActivity, Status>> + Send + 'static,
    ) -> ResponseStream<UserActivityResponse> {
        let ctx = self.context(Method::UserActivityStream, CallKind::Bidirectional, metadata);
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let pipeline = Arc::clone(&self.pipeline);
        let service = Arc::clone(&self.service);
        let cancel = ctx.cancellation().clone();
        let stream = BidiStream::new(ctx, Inbound::new(input), Outbound::new(tx.clone()));

        drive(tx, cancel, async move {
            pipeline
                .streaming(stream, |stream| service.user_activity_stream(stream))
                .await
        });
        rx
    }

    pub fn sync_users(
        &self,
        metadata: Option<MetadataMap>,
        input: impl Stream<Item = Result<User, Status>> + Send + 'static,
    ) -> ResponseStream<SyncUserResponse> {
        let ctx = self.context(Method::SyncUsers, CallKind::Bidirectional, metadata);
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let pipeline = Arc::clone(&self.pipeline);
        let service = Arc::clone(&self.service);
        let cancel = ctx.cancellation().clone();
        let stream = BidiStream::new(ctx, Inbound::new(input), Outbound::new(tx.clone()));

        drive(tx, cancel, async move {
            pipeline
                .streaming(stream, |stream| service.sync_users(stream))
                .await
        });
        rx
    }
}

/// Run a streaming call in the background.
///
/// The call is cancelled once the receiver is dropped; a failure is
/// delivered as the final item.
fn drive<T, F>(tx: OutboundSender<T>, cancel: CancellationToken, call: F)
where
    T: Send + 'static,
    F: Future<Output = ServiceResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let watcher = tokio::spawn({
            let tx = tx.clone();
            let cancel = cancel.clone();
            async move {
                tx.closed().await;
                cancel.cancel();
            }
        });

        if let Err(e) = call.await {
            if tx.send(Err(Status::from(e))).await.is_err() {
                tracing::debug!("Caller gone before the final status was delivered");
            }
        }
        watcher.abort();
    });
}
