//! Interceptor chain integration tests.
//!
//! Covers authentication short-circuiting, both authorization policies,
//! and the metrics recorded for accepted and rejected calls.
//!
//! Run with: `cargo test --test pipeline_test`

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use helpers::{bearer, collect, TestApp};
use roster_common::{DeleteUserRequest, GetUserRequest, ListUsersRequest, Role, User, UserStatus};
use roster_server::auth::{SnapshotApprover, StaticApprover};
use roster_server::config::Config;
use roster_server::pipeline::{AuthStage, MetricsCollector, Pipeline};
use roster_server::service::{Method, RosterServer, UserService};
use roster_server::storage::{ListFilter, MemoryStorage, StorageResult, UserStorage};
use tonic::metadata::MetadataMap;
use tonic::Code;

/// Storage wrapper counting every operation the handlers perform.
#[derive(Default)]
struct CountingStorage {
    inner: MemoryStorage,
    calls: AtomicUsize,
}

impl CountingStorage {
    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStorage for CountingStorage {
    async fn add(&self, user: User) -> StorageResult<()> {
        self.hit();
        self.inner.add(user).await
    }

    async fn get(&self, id: u32) -> StorageResult<User> {
        self.hit();
        self.inner.get(id).await
    }

    async fn update(&self, user: User) -> StorageResult<()> {
        self.hit();
        self.inner.update(user).await
    }

    async fn delete(&self, id: u32) -> StorageResult<()> {
        self.hit();
        self.inner.delete(id).await
    }

    async fn list(&self, filter: &ListFilter) -> StorageResult<Vec<User>> {
        self.hit();
        self.inner.list(filter).await
    }

    async fn list_by_role(&self, role: Role) -> StorageResult<Vec<User>> {
        self.hit();
        self.inner.list_by_role(role).await
    }

    async fn exists(&self, id: u32) -> StorageResult<bool> {
        self.hit();
        self.inner.exists(id).await
    }

    async fn count(&self) -> StorageResult<usize> {
        self.hit();
        self.inner.count().await
    }
}

fn tamper(token: &str) -> String {
    let (head, signature) = token.rsplit_once('.').expect("token has three parts");
    let flipped = if signature.starts_with('A') { 'B' } else { 'A' };
    format!("{head}.{flipped}{}", &signature[1..])
}

#[tokio::test]
async fn test_tampered_token_never_reaches_handler() {
    let app = TestApp::secured();
    let counting = Arc::new(CountingStorage::default());

    let config = Config::default_for_test();
    let pipeline = Pipeline::new(Arc::clone(&app.metrics)).with_auth(AuthStage::new(
        app.tokens.clone(),
        Arc::new(StaticApprover::default()),
    ));
    let server = RosterServer::new(
        Arc::new(pipeline),
        Arc::new(UserService::new(Arc::clone(&counting) as Arc<dyn UserStorage>)),
        config.stream_buffer,
    );

    let metadata = app.admin().expect("admin metadata");
    let token = metadata
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .expect("bearer token")
        .to_string();

    let status = server
        .get_user(Some(bearer(&tamper(&token))), GetUserRequest { id: 1 })
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert!(!status.message().contains(&token));
    assert_eq!(counting.calls(), 0);

    let (items, status) = collect(server.list_users(
        Some(bearer("not-a-token")),
        ListUsersRequest::default(),
    ))
    .await;
    assert!(items.is_empty());
    assert_eq!(status.map(|s| s.code()), Some(Code::Unauthenticated));
    assert_eq!(counting.calls(), 0);
}

#[tokio::test]
async fn test_missing_and_malformed_credentials() {
    let app = TestApp::secured();

    let status = app
        .server
        .get_user(None, GetUserRequest { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "Missing metadata");

    let status = app
        .server
        .get_user(Some(MetadataMap::new()), GetUserRequest { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);

    let mut basic = MetadataMap::new();
    basic.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
    let status = app
        .server
        .get_user(Some(basic), GetUserRequest { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
}

#[tokio::test]
async fn test_static_rules_gate_mutations() {
    let app = TestApp::secured();
    app.seed([User::new(1, "admin", Role::Admin), User::new(2, "bob", Role::Member)])
        .await;

    let member = app.auth_for(2, &[Role::Member]);
    let status = app
        .server
        .delete_user(member.clone(), DeleteUserRequest { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
    assert!(app.storage.exists(1).await.unwrap());

    // No rule covers GetUser, so any authenticated caller passes.
    let user = app
        .server
        .get_user(member, GetUserRequest { id: 1 })
        .await
        .unwrap();
    assert_eq!(user.username, "admin");

    app.server
        .delete_user(app.admin(), DeleteUserRequest { id: 2 })
        .await
        .unwrap();
    assert!(!app.storage.exists(2).await.unwrap());
}

#[tokio::test]
async fn test_snapshot_policy_follows_stored_user() {
    let approver = Arc::new(SnapshotApprover::new());
    let app = TestApp::with_approver(Arc::clone(&approver) as _);
    app.seed([
        User::new(1, "admin", Role::Admin),
        User::new(2, "bob", Role::Member),
        User {
            status: Some(UserStatus::Suspended),
            ..User::new(3, "mallory", Role::Admin)
        },
    ])
    .await;

    // Nothing loaded yet: deny everything.
    let status = app
        .server
        .get_user(app.admin(), GetUserRequest { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    assert_eq!(approver.refresh(app.storage.as_ref()).await.unwrap(), 3);

    app.server
        .get_user(app.admin(), GetUserRequest { id: 2 })
        .await
        .unwrap();

    // Token claims ADMIN but storage says MEMBER.
    let status = app
        .server
        .delete_user(app.auth_for(2, &[Role::Admin]), DeleteUserRequest { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = app
        .server
        .get_user(app.auth_for(3, &[Role::Admin]), GetUserRequest { id: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    // Unknown to the snapshot: token roles decide.
    app.server
        .get_user(app.auth_for(99, &[Role::Guest]), GetUserRequest { id: 1 })
        .await
        .unwrap();
    let (_, status) = collect(app.server.list_users(
        app.auth_for(99, &[Role::Guest]),
        ListUsersRequest::default(),
    ))
    .await;
    assert_eq!(status.map(|s| s.code()), Some(Code::PermissionDenied));
}

#[tokio::test]
async fn test_metrics_count_rejected_and_accepted_calls() {
    let app = TestApp::secured();
    app.seed([User::new(1, "admin", Role::Admin)]).await;

    app.server
        .get_user(app.admin(), GetUserRequest { id: 1 })
        .await
        .unwrap();
    app.server
        .get_user(None, GetUserRequest { id: 1 })
        .await
        .unwrap_err();
    app.server
        .get_user(app.admin(), GetUserRequest { id: 7 })
        .await
        .unwrap_err();

    let snapshot = app.metrics.snapshot();
    assert_eq!(snapshot.total_calls, 3);
    assert_eq!(snapshot.total_errors, 2);
    assert_eq!(snapshot.in_flight, 0);

    let get_user = &snapshot.methods[Method::GetUser.full_name()];
    assert_eq!(get_user.calls, 3);
    assert_eq!(get_user.errors, 2);

    app.metrics.reset();
    assert_eq!(app.metrics.snapshot().total_calls, 0);
}

#[tokio::test]
async fn test_open_chain_needs_no_credentials() {
    let metrics = Arc::new(MetricsCollector::new());
    let server = RosterServer::new(
        Arc::new(Pipeline::new(Arc::clone(&metrics))),
        Arc::new(UserService::new(Arc::new(MemoryStorage::new()))),
        4,
    );

    server
        .add_user(None, User::new(1, "admin", Role::Admin))
        .await
        .unwrap();
    assert!(!server.pipeline().auth_enabled());
    assert_eq!(metrics.snapshot().total_errors, 0);
}
