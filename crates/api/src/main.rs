//! Membergate API Server

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::info;

use membergate_api::{AppState, Config};
use membergate_payments::PaymentsService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Membergate API");

    let config = Config::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database_url)
        .await?;
    info!("Database pool created");

    PaymentsService::run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    info!("Migrations applied");

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(pool, config);
    let app = membergate_api::routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API listening");
    axum::serve(listener, app).await?;

    Ok(())
}
