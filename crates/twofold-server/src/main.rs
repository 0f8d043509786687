mod config;

use std::sync::Arc;

use tracing::info;

use twofold_api::{AppState, AppStateInner, router};
use twofold_db::Database;
use twofold_gateway::Gateway;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twofold=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        gateway: Gateway::new(db, config.policy),
        jwt_secret: config.jwt_secret,
        token_ttl: config.token_ttl,
    });
    info!("Chat policy: {:?}", config.policy);

    let app = router::build(app_state);

    info!("Twofold server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
