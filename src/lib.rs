pub mod admin;
pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod tools;
pub mod usage;

use std::sync::Arc;

use actix_web::HttpResponse;
use sqlx::PgPool;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use ai::crypto::CredentialVault;
pub use ai::service::AiDispatcher;
pub use db::DbOperations;
pub use identity::IdentityResolver;
pub use tools::ToolRegistry;
pub use usage::UsageGuard;

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub db: Arc<DbOperations>,
    pub identity: Arc<IdentityResolver>,
    pub usage: Arc<UsageGuard>,
    pub ai: Arc<AiDispatcher>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        let pool = PgPool::connect(&config.database.url)
            .await
            .map_err(|e| {
                AppError::DatabaseError(error::DatabaseError::ConnectionError(e.to_string()))
            })?;

        Self::with_pool(config, Arc::new(pool))
    }

    /// Builds the component graph over an existing pool. Tests use this
    /// with their own disposable databases.
    pub fn with_pool(config: Settings, pool: Arc<PgPool>) -> Result<Self> {
        let db = Arc::new(DbOperations::new(pool));
        let vault = CredentialVault::from_base64_key(&config.ai.credential_key)?;

        let identity = Arc::new(IdentityResolver::new(
            config.auth.jwt_secret.clone(),
            config.auth.session_cookie_name.clone(),
            config.auth.session_ttl_hours,
            config.is_production(),
        ));
        let usage = Arc::new(UsageGuard::new(db.clone(), config.limits.clone()));
        let ai = Arc::new(AiDispatcher::new(db.clone(), vault));
        let tools = Arc::new(ToolRegistry::builtin());

        Ok(Self {
            config: Arc::new(config),
            db,
            identity,
            usage,
            ai,
            tools,
        })
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.db.pool().close().await;
        Ok(())
    }
}
