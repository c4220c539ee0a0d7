use dlsgate_application::GrantManager;
use sqlx::PgPool;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub grant_manager: GrantManager,
    pub admin_token: String,
    /// Present when the ledger lives in PostgreSQL.
    pub postgres_pool: Option<PgPool>,
}
