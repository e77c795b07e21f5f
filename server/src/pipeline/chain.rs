//! Interceptor Chain
//!
//! Every call runs through the same fixed order:
//!
//! 1. logging: an `rpc` span with start and end events
//! 2. metrics: in-flight gauge, call and error counters, duration
//! 3. authentication then authorization, when enabled for the deployment
//! 4. the handler, raced against the call's cancellation
//!
//! A rejected or cancelled call never reaches (or never finishes) the
//! handler, but stages 1 and 2 still observe it as an error.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::context::{CallContext, CallKind};
use super::metrics::{InFlightGuard, MetricsCollector};
use super::stream::CallStream;
use crate::auth::{authenticate, MethodApprover, TokenManager};
use crate::error::{ErrorKind, ServiceError, ServiceResult};

/// Authentication and authorization stage.
pub struct AuthStage {
    tokens: TokenManager,
    approver: Arc<dyn MethodApprover>,
}

impl AuthStage {
    pub fn new(tokens: TokenManager, approver: Arc<dyn MethodApprover>) -> Self {
        Self { tokens, approver }
    }

    /// Validate the caller's credential, approve the method, and attach
    /// the resulting claims to `ctx`.
    fn admit(&self, ctx: &CallContext) -> ServiceResult<()> {
        let claims = authenticate(ctx.metadata(), &self.tokens).map_err(|e| {
            tracing::warn!(error = %e, "Unauthenticated call rejected");
            e
        })?;

        self.approver
            .approve(ctx.method(), &claims)
            .map_err(|e| {
                tracing::warn!(user_id = %claims.user_id(), error = %e, "Call denied");
                e
            })?;

        tracing::debug!(
            user_id = %claims.user_id(),
            username = %claims.username(),
            roles = ?claims.roles(),
            "Caller authorized"
        );

        ctx.attach_claims(claims)
            .map_err(|e| ServiceError::internal(e.to_string()))
    }
}

impl std::fmt::Debug for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStage")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

/// What the outer stages need to know about a call.
struct CallInfo {
    method: String,
    kind: CallKind,
    request_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallInfo {
    fn of(ctx: &CallContext) -> Self {
        Self {
            method: ctx.method().to_string(),
            kind: ctx.kind(),
            request_id: ctx.request_id(),
            cancel: ctx.cancellation().clone(),
            deadline: ctx.deadline(),
        }
    }
}

/// Ordered wrapper applied to every call.
#[derive(Debug)]
pub struct Pipeline {
    metrics: Arc<MetricsCollector>,
    auth: Option<AuthStage>,
}

impl Pipeline {
    /// Chain without the auth stage.
    pub const fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self {
            metrics,
            auth: None,
        }
    }

    /// Add the auth stage.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthStage) -> Self {
        self.auth = Some(auth);
        self
    }

    pub const fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub const fn auth_enabled(&self) -> bool {
        self.auth.is_some()
    }

    /// Run a unary call.
    pub async fn unary<Req, Resp, F, Fut>(
        &self,
        ctx: CallContext,
        request: Req,
        handler: F,
    ) -> ServiceResult<Resp>
    where
        F: FnOnce(Arc<CallContext>, Req) -> Fut,
        Fut: Future<Output = ServiceResult<Resp>>,
    {
        let info = CallInfo::of(&ctx);
        let ctx = Arc::new(ctx);

        self.observe(&info, async {
            self.admit(&ctx)?;
            until_cancelled(&info, handler(Arc::clone(&ctx), request)).await
        })
        .await
    }

    /// Run a streaming call of any shape.
    ///
    /// Client-streaming handlers return their single response; the others
    /// return `()` once they have sent everything.
    pub async fn streaming<S, T, F, Fut>(&self, stream: S, handler: F) -> ServiceResult<T>
    where
        S: CallStream,
        F: FnOnce(S) -> Fut,
        Fut: Future<Output = ServiceResult<T>>,
    {
        let info = CallInfo::of(stream.context());

        self.observe(&info, async {
            self.admit(stream.context())?;
            until_cancelled(&info, handler(stream)).await
        })
        .await
    }

    fn admit(&self, ctx: &CallContext) -> ServiceResult<()> {
        match &self.auth {
            Some(auth) => auth.admit(ctx),
            None => Ok(()),
        }
    }

    /// Logging and metrics stages around `call`.
    ///
    /// Finalization also runs when the future is dropped before completion;
    /// such a call is recorded as Cancelled.
    async fn observe<T>(
        &self,
        info: &CallInfo,
        call: impl Future<Output = ServiceResult<T>>,
    ) -> ServiceResult<T> {
        let span = tracing::info_span!(
            "rpc",
            method = %info.method,
            kind = %info.kind,
            request_id = %info.request_id,
        );

        async {
            tracing::info!("Call started");
            let outcome = Outcome::begin(&self.metrics, &info.method);
            let result = call.await;
            outcome.finish(&result);
            result
        }
        .instrument(span)
        .await
    }
}

/// Records and logs the end of one call exactly once.
struct Outcome<'a> {
    metrics: &'a MetricsCollector,
    method: &'a str,
    start: Instant,
    finished: bool,
    _in_flight: InFlightGuard<'a>,
}

impl<'a> Outcome<'a> {
    fn begin(metrics: &'a MetricsCollector, method: &'a str) -> Self {
        Self {
            metrics,
            method,
            start: Instant::now(),
            finished: false,
            _in_flight: metrics.enter(),
        }
    }

    fn finish<T>(mut self, result: &ServiceResult<T>) {
        self.finished = true;
        let duration_ms = self.record(result.is_err());
        match result {
            Ok(_) => tracing::info!(duration_ms, code = "OK", "Call completed"),
            Err(e) => tracing::warn!(
                duration_ms,
                code = e.kind().as_str(),
                error = %e,
                "Call failed"
            ),
        }
    }

    fn record(&self, is_error: bool) -> u64 {
        let elapsed = self.start.elapsed();
        self.metrics.record(self.method, elapsed, is_error);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let duration_ms = self.record(true);
        tracing::warn!(
            duration_ms,
            code = ErrorKind::Cancelled.as_str(),
            "Call abandoned by caller"
        );
    }
}

/// Race `call` against cancellation of the call and its deadline.
///
/// An expired deadline cancels the call's token, so every wrapper sharing
/// the context observes it.
async fn until_cancelled<T>(
    info: &CallInfo,
    call: impl Future<Output = ServiceResult<T>>,
) -> ServiceResult<T> {
    let expired = async {
        match info.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        biased;
        () = info.cancel.cancelled() => Err(ServiceError::Cancelled),
        () = expired => {
            tracing::debug!("Deadline exceeded");
            info.cancel.cancel();
            Err(ServiceError::Cancelled)
        }
        result = call => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tonic::metadata::MetadataMap;

    use super::*;
    use crate::auth::{Identity, StaticApprover, AUTHORIZATION};
    use crate::error::ErrorKind;

    fn tokens() -> TokenManager {
        TokenManager::new("secret", Duration::from_secs(60), "roster-test")
    }

    fn secured() -> Pipeline {
        Pipeline::new(Arc::new(MetricsCollector::new()))
            .with_auth(AuthStage::new(tokens(), Arc::new(StaticApprover::default())))
    }

    fn bearer(roles: &[&str]) -> MetadataMap {
        let token = tokens()
            .generate_token(&Identity {
                user_id: "1".into(),
                username: "admin".into(),
                roles: roles.iter().map(ToString::to_string).collect(),
                ..Identity::default()
            })
            .unwrap();
        let mut metadata = MetadataMap::new();
        metadata.insert(AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        metadata
    }

    #[tokio::test]
    async fn test_open_chain_runs_handler() {
        let pipeline = Pipeline::new(Arc::new(MetricsCollector::new()));
        let ctx = CallContext::new("/svc/Echo", CallKind::Unary, None);

        let out = pipeline
            .unary(ctx, 21, |ctx, n| async move {
                assert!(ctx.claims().is_none());
                Ok(n * 2)
            })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(pipeline.metrics().snapshot().total_calls, 1);
    }

    #[tokio::test]
    async fn test_missing_credential_short_circuits() {
        let pipeline = secured();
        let invoked = AtomicUsize::new(0);
        let counter = &invoked;
        let ctx = CallContext::new("/svc/Echo", CallKind::Unary, Some(MetadataMap::new()));

        let err = pipeline
            .unary(ctx, (), |_, ()| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        let snapshot = pipeline.metrics().snapshot();
        assert_eq!(snapshot.total_calls, 1);
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test]
    async fn test_claims_reach_handler() {
        let pipeline = secured();
        let ctx = CallContext::new(
            "/roster.v1.UserService/DeleteUser",
            CallKind::Unary,
            Some(bearer(&["ADMIN"])),
        );

        let username = pipeline
            .unary(ctx, (), |ctx, ()| async move {
                Ok(ctx.claims().map(|c| c.username().to_string()))
            })
            .await
            .unwrap();
        assert_eq!(username.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_denied_method() {
        let pipeline = secured();
        let ctx = CallContext::new(
            "/roster.v1.UserService/DeleteUser",
            CallKind::Unary,
            Some(bearer(&["MEMBER"])),
        );

        let err = pipeline
            .unary(ctx, (), |_, ()| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_cancelled_call_is_counted_as_error() {
        let pipeline = Pipeline::new(Arc::new(MetricsCollector::new()));
        let ctx = CallContext::new("/svc/Slow", CallKind::Unary, None);
        let cancel = ctx.cancellation().clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = pipeline
            .unary(ctx, (), |_, ()| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(pipeline.metrics().snapshot().total_errors, 1);
    }

    #[tokio::test]
    async fn test_dropped_call_is_still_recorded() {
        let pipeline = Pipeline::new(Arc::new(MetricsCollector::new()));
        let ctx = CallContext::new("/svc/Hang", CallKind::Unary, None);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            pipeline.unary(ctx, (), |_, ()| std::future::pending::<ServiceResult<()>>()),
        )
        .await;
        assert!(abandoned.is_err());

        let snapshot = pipeline.metrics().snapshot();
        assert_eq!(snapshot.total_calls, 1);
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.methods["/svc/Hang"].errors, 1);
    }

    #[tokio::test]
    async fn test_deadline_cancels_slow_handler() {
        let pipeline = Pipeline::new(Arc::new(MetricsCollector::new()));
        let ctx = CallContext::new("/svc/Slow", CallKind::Unary, None)
            .with_timeout(Duration::from_millis(20));
        let cancel = ctx.cancellation().clone();

        let err = pipeline
            .unary(ctx, (), |_, ()| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(cancel.is_cancelled());
        assert_eq!(pipeline.metrics().snapshot().total_errors, 1);
    }
}
