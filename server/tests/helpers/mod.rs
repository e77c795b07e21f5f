//! Reusable test helpers for `RosterServer` integration tests.
//!
//! Provides [`TestApp`] for driving calls through the full interceptor
//! chain over in-memory storage, plus token and metadata utilities.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use roster_common::{Role, User};
use roster_server::auth::{Identity, MethodApprover, StaticApprover, TokenManager, AUTHORIZATION};
use roster_server::config::Config;
use roster_server::pipeline::{AuthStage, MetricsCollector, Pipeline};
use roster_server::service::{ResponseStream, RosterServer, UserService};
use roster_server::storage::{MemoryStorage, UserStorage};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::Status;

/// Server over in-memory storage with direct access to its internals.
pub struct TestApp {
    pub server: RosterServer,
    pub storage: Arc<dyn UserStorage>,
    pub metrics: Arc<MetricsCollector>,
    pub tokens: TokenManager,
    pub shutdown: CancellationToken,
}

impl TestApp {
    /// Chain without the auth stage.
    pub fn open() -> Self {
        Self::build(None)
    }

    /// Chain with the default static rule table.
    pub fn secured() -> Self {
        Self::build(Some(Arc::new(StaticApprover::default())))
    }

    /// Chain with a custom approver.
    pub fn with_approver(approver: Arc<dyn MethodApprover>) -> Self {
        Self::build(Some(approver))
    }

    fn build(approver: Option<Arc<dyn MethodApprover>>) -> Self {
        let config = Config::default_for_test();
        let tokens = TokenManager::new(&config.jwt_secret, config.jwt_expiry, &config.jwt_issuer);
        let storage: Arc<dyn UserStorage> = Arc::new(MemoryStorage::new());
        let metrics = Arc::new(MetricsCollector::new());
        let shutdown = CancellationToken::new();

        let mut pipeline = Pipeline::new(Arc::clone(&metrics));
        if let Some(approver) = approver {
            pipeline = pipeline.with_auth(AuthStage::new(tokens.clone(), approver));
        }

        let server = RosterServer::new(
            Arc::new(pipeline),
            Arc::new(UserService::new(Arc::clone(&storage))),
            config.stream_buffer,
        )
        .with_shutdown(shutdown.clone());

        Self {
            server,
            storage,
            metrics,
            tokens,
            shutdown,
        }
    }

    /// Bearer metadata for a caller holding `roles`.
    pub fn auth_for(&self, user_id: u32, roles: &[Role]) -> Option<MetadataMap> {
        let token = self
            .tokens
            .generate_token(&Identity {
                user_id: user_id.to_string(),
                username: format!("user{user_id}"),
                roles: roles.iter().map(|r| r.as_str().to_string()).collect(),
                ..Identity::default()
            })
            .expect("token generation should succeed");
        Some(bearer(&token))
    }

    /// Metadata for an admin caller.
    pub fn admin(&self) -> Option<MetadataMap> {
        self.auth_for(1, &[Role::Admin])
    }

    /// Insert users directly into storage, bypassing the chain.
    pub async fn seed(&self, users: impl IntoIterator<Item = User>) {
        for user in users {
            self.storage.add(user).await.expect("seeding should succeed");
        }
    }
}

/// Metadata carrying `Authorization: Bearer <token>`.
pub fn bearer(token: &str) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    metadata.insert(
        AUTHORIZATION,
        format!("Bearer {token}").parse().expect("valid header value"),
    );
    metadata
}

/// Collect a response stream until it ends or yields an error.
pub async fn collect<T>(mut rx: ResponseStream<T>) -> (Vec<T>, Option<Status>) {
    let mut items = Vec::new();
    while let Some(item) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("stream should make progress")
    {
        match item {
            Ok(item) => items.push(item),
            Err(status) => return (items, Some(status)),
        }
    }
    (items, None)
}
