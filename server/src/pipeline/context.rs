//! Per-Call Execution Context

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use uuid::Uuid;

use crate::auth::Claims;

/// Shape of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

impl CallKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ServerStreaming => "server_streaming",
            Self::ClientStreaming => "client_streaming",
            Self::Bidirectional => "bidirectional",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata key carrying the caller's timeout.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Parse a `grpc-timeout` value: up to eight digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u` or `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

/// Claims were already attached to this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("claims already attached to this call")]
pub struct ClaimsAlreadyAttached;

/// State scoped to one call (unary) or one stream session.
///
/// Claims are written at most once, by the authentication stage, and are
/// read-only afterwards. Nothing here outlives the call.
#[derive(Debug)]
pub struct CallContext {
    method: String,
    kind: CallKind,
    metadata: Option<MetadataMap>,
    claims: OnceLock<Claims>,
    request_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Context for a call to `method`. `None` metadata means the call
    /// carried none at all.
    pub fn new(method: impl Into<String>, kind: CallKind, metadata: Option<MetadataMap>) -> Self {
        Self {
            method: method.into(),
            kind,
            metadata,
            claims: OnceLock::new(),
            request_id: Uuid::now_v7(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Tie this call's cancellation to `parent` (e.g. the server shutdown token).
    #[must_use]
    pub fn with_parent(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Cancel the call once `timeout` has elapsed from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Apply the `grpc-timeout` carried in the call metadata, if any.
    #[must_use]
    pub fn with_metadata_timeout(self) -> Self {
        let timeout = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get(GRPC_TIMEOUT))
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout);

        match timeout {
            Some(timeout) => self.with_timeout(timeout),
            None => self,
        }
    }

    /// Fully-qualified method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub const fn kind(&self) -> CallKind {
        self.kind
    }

    pub const fn metadata(&self) -> Option<&MetadataMap> {
        self.metadata.as_ref()
    }

    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Authenticated identity, when the auth stage ran and succeeded.
    pub fn claims(&self) -> Option<&Claims> {
        self.claims.get()
    }

    /// Attach the caller's claims. Only the first call succeeds.
    pub(crate) fn attach_claims(&self, claims: Claims) -> Result<(), ClaimsAlreadyAttached> {
        self.claims.set(claims).map_err(|_| ClaimsAlreadyAttached)
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Token cancelled on caller disconnect or deadline expiry.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Abandon the call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(user_id: &str) -> Claims {
        Claims {
            user_id: user_id.into(),
            username: "u".into(),
            email: String::new(),
            roles: Default::default(),
            iss: "roster-test".into(),
            sub: user_id.into(),
            iat: 0,
            nbf: 0,
            exp: 0,
        }
    }

    #[test]
    fn test_claims_attach_once() {
        let ctx = CallContext::new("/svc/A", CallKind::Unary, None);
        assert!(ctx.claims().is_none());

        ctx.attach_claims(claims("1")).unwrap();
        assert_eq!(ctx.attach_claims(claims("2")), Err(ClaimsAlreadyAttached));
        assert_eq!(ctx.claims().unwrap().user_id, "1");
    }

    #[test]
    fn test_parent_cancellation_propagates() {
        let shutdown = CancellationToken::new();
        let ctx = CallContext::new("/svc/A", CallKind::Bidirectional, None).with_parent(&shutdown);
        assert!(!ctx.is_cancelled());
        shutdown.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_parse_grpc_timeout() {
        assert_eq!(parse_grpc_timeout("5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_grpc_timeout("250m"), Some(Duration::from_millis(250)));
        assert_eq!(parse_grpc_timeout("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("10x"), None);
        assert_eq!(parse_grpc_timeout("-1S"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
    }

    #[tokio::test]
    async fn test_metadata_timeout_sets_deadline() {
        let mut metadata = MetadataMap::new();
        metadata.insert(GRPC_TIMEOUT, "100m".parse().unwrap());

        let ctx = CallContext::new("/svc/A", CallKind::Unary, Some(metadata)).with_metadata_timeout();
        let deadline = ctx.deadline().unwrap();
        assert!(deadline <= Instant::now() + Duration::from_millis(100));

        let plain = CallContext::new("/svc/A", CallKind::Unary, None).with_metadata_timeout();
        assert!(plain.deadline().is_none());
    }

    #[test]
    fn test_request_ids_differ() {
        let a = CallContext::new("/svc/A", CallKind::Unary, None);
        let b = CallContext::new("/svc/A", CallKind::Unary, None);
        assert_ne!(a.request_id(), b.request_id());
        assert_eq!(a.kind().as_str(), "unary");
    }
}
