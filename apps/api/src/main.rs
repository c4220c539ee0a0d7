//! dlsgate API composition root.

#![forbid(unsafe_code)]

mod api_config;
mod api_router;
mod dto;
mod error;
mod handlers;
mod middleware;
mod reconcile;
mod state;

use std::sync::Arc;

use dlsgate_application::{
    GrantLedger, GrantManager, GrantPolicy, SystemClock, TokioGrantScheduler,
};
use dlsgate_core::AppError;
use dlsgate_infrastructure::{HttpPermissionStore, InMemoryGrantLedger, PostgresGrantLedger};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::api_config::{ApiConfig, LedgerBackendConfig, init_tracing};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ApiConfig::load()?;

    let (ledger, postgres_pool): (Arc<dyn GrantLedger>, Option<PgPool>) =
        match &config.ledger_backend {
            LedgerBackendConfig::Postgres { database_url } => {
                let pool = connect_and_migrate(database_url).await?;
                if config.migrate_only {
                    info!("database migrations applied successfully");
                    return Ok(());
                }
                (Arc::new(PostgresGrantLedger::new(pool.clone())), Some(pool))
            }
            LedgerBackendConfig::Memory => {
                warn!("using the in-memory ledger; grants will not survive a restart");
                (Arc::new(InMemoryGrantLedger::new()), None)
            }
        };

    let permission_store = Arc::new(HttpPermissionStore::new(config.permission_store.clone())?);
    let clock = Arc::new(SystemClock);
    let scheduler = Arc::new(TokioGrantScheduler::new(clock.clone()));
    let policy = GrantPolicy::new(config.grant_window)?;

    let grant_manager = GrantManager::new(ledger, permission_store, scheduler, clock, policy);

    let recovery = grant_manager.recover().await?;
    info!(
        rearmed = recovery.rearmed,
        expired = recovery.expired,
        failed = recovery.failed,
        "active grants recovered from ledger"
    );

    reconcile::spawn_reconcile_loop(grant_manager.clone(), config.reconcile_interval);

    let app = api_router::build_router(AppState {
        grant_manager,
        admin_token: config.admin_token.clone(),
        postgres_pool,
    });

    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind API listener: {error}")))?;

    info!(%address, "dlsgate api listening");

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("api server failed: {error}")))
}

async fn connect_and_migrate(database_url: &str) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}
