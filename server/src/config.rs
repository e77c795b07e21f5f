//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{bail, Result};
use std::env;
use std::time::Duration;

/// Default token lifetime when `JWT_EXPIRY` is unset or zero.
pub const DEFAULT_JWT_EXPIRY_SECS: u64 = 3600;

/// Which authorization policy the auth stage consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzPolicy {
    /// Rule table compiled into the binary; unmatched methods are allowed.
    Static,
    /// Per-user snapshot refreshed in batch from storage; unmatched methods are denied.
    Snapshot,
}

impl AuthzPolicy {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "snapshot" => Ok(Self::Snapshot),
            other => bail!("AUTHZ_POLICY must be 'static' or 'snapshot', got '{other}'"),
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` connection URL; the in-memory engine is used when unset
    pub database_url: Option<String>,

    /// Whether the authentication/authorization stage is part of the chain
    pub auth_enabled: bool,

    /// HS256 signing secret
    pub jwt_secret: String,

    /// Token issuer (`iss` claim)
    pub jwt_issuer: String,

    /// Token lifetime
    pub jwt_expiry: Duration,

    /// Authorization policy
    pub authz_policy: AuthzPolicy,

    /// How often the snapshot approver reloads from storage
    pub authz_refresh_interval: Duration,

    /// Log final call statistics on shutdown
    pub print_metrics: bool,

    /// Capacity of each outbound stream buffer
    pub stream_buffer: usize,
}

fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let auth_enabled = env_flag("AUTH_ENABLED", false);

        let jwt_secret = match env::var("JWT_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            _ if auth_enabled => bail!("JWT_SECRET must be set when AUTH_ENABLED is on"),
            _ => String::new(),
        };

        let expiry_secs = env_parse::<u64>("JWT_EXPIRY")
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_JWT_EXPIRY_SECS);

        let authz_policy = match env::var("AUTHZ_POLICY") {
            Ok(v) => AuthzPolicy::parse(&v)?,
            Err(_) => AuthzPolicy::Static,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            auth_enabled,
            jwt_secret,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "roster".into()),
            jwt_expiry: Duration::from_secs(expiry_secs),
            authz_policy,
            authz_refresh_interval: Duration::from_secs(
                env_parse("AUTHZ_REFRESH_INTERVAL")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(60),
            ),
            print_metrics: env_flag("PRINT_METRICS", false),
            stream_buffer: env_parse("STREAM_BUFFER")
                .filter(|n| *n > 0)
                .unwrap_or(32),
        })
    }

    /// Create a default configuration for testing.
    ///
    /// Auth is on, with the static policy and the in-memory engine.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            database_url: None,
            auth_enabled: true,
            jwt_secret: "test-jwt-secret-key-12345".into(),
            jwt_issuer: "roster-test".into(),
            jwt_expiry: Duration::from_secs(DEFAULT_JWT_EXPIRY_SECS),
            authz_policy: AuthzPolicy::Static,
            authz_refresh_interval: Duration::from_secs(60),
            print_metrics: false,
            stream_buffer: 8,
        }
    }
}
