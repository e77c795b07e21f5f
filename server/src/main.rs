//! Roster Server - Main Entry Point
//!
//! Wires storage, the interceptor chain and the `UserService` together,
//! then runs until interrupted.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use roster_server::auth::{MethodApprover, SnapshotApprover, StaticApprover, TokenManager};
use roster_server::config::{AuthzPolicy, Config};
use roster_server::pipeline::{AuthStage, MetricsCollector, Pipeline};
use roster_server::service::{RosterServer, UserService};
use roster_server::storage::{MemoryStorage, PostgresStorage, UserStorage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roster_server=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        auth_enabled = config.auth_enabled,
        "Starting Roster Server"
    );

    // Initialize storage
    let storage: Arc<dyn UserStorage> = match &config.database_url {
        Some(url) => Arc::new(PostgresStorage::connect(url).await?),
        None => {
            info!("DATABASE_URL not set, using in-memory storage");
            Arc::new(MemoryStorage::new())
        }
    };

    let shutdown = CancellationToken::new();
    let metrics = Arc::new(MetricsCollector::new());

    // Build the interceptor chain
    let mut pipeline = Pipeline::new(Arc::clone(&metrics));
    let mut refresher = None;
    if config.auth_enabled {
        let tokens = TokenManager::new(&config.jwt_secret, config.jwt_expiry, &config.jwt_issuer);

        let approver: Arc<dyn MethodApprover> = match config.authz_policy {
            AuthzPolicy::Static => Arc::new(StaticApprover::default()),
            AuthzPolicy::Snapshot => {
                let approver = Arc::new(SnapshotApprover::new());
                if let Err(e) = approver.refresh(storage.as_ref()).await {
                    tracing::warn!(error = %e, "Initial authorization snapshot failed, denying until next refresh");
                }
                refresher = Some(Arc::clone(&approver).spawn_refresh(
                    Arc::clone(&storage),
                    config.authz_refresh_interval,
                    shutdown.clone(),
                ));
                approver
            }
        };

        info!(policy = ?config.authz_policy, issuer = %config.jwt_issuer, "Authentication enabled");
        pipeline = pipeline.with_auth(AuthStage::new(tokens, approver));
    }

    let server = RosterServer::new(
        Arc::new(pipeline),
        Arc::new(UserService::new(storage)),
        config.stream_buffer,
    )
    .with_shutdown(shutdown.clone());

    info!(auth = server.pipeline().auth_enabled(), "Server ready");

    // Graceful shutdown
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");
    shutdown.cancel();

    if let Some(handle) = refresher {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Snapshot refresher did not stop cleanly");
        }
    }

    if config.print_metrics {
        metrics.log_stats();
    }

    info!("Server shutdown complete");
    Ok(())
}
