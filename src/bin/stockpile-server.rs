//! Stockpile HTTP server backed by PostgreSQL
//!
//! Usage: `stockpile-server [config.yaml]`. The config path may also be given
//! through `STOCKPILE_CONFIG`; without either, defaults apply. The database URL
//! comes from `database.url` or `DATABASE_URL`.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use stockpile::config::StockpileConfig;
use stockpile::server::{AppState, serve};
use stockpile::storage::{PostgresStore, ensure_schema};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockpile=info,tower_http=info".into()),
        )
        .init();

    let config = match std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STOCKPILE_CONFIG").ok())
    {
        Some(path) => StockpileConfig::from_yaml_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => StockpileConfig::default(),
    };

    let url = match config.database.url.clone() {
        Some(url) => url,
        None => std::env::var("DATABASE_URL")
            .context("database.url is not set and DATABASE_URL is missing")?,
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&url)
        .await
        .context("failed to connect to PostgreSQL")?;
    tracing::info!("Connected to PostgreSQL");

    ensure_schema(&pool).await?;

    let store = Arc::new(PostgresStore::with_lock_timeout(
        pool,
        config.ledger.lock_timeout(),
    ));
    let state = AppState::from_config(store, &config);

    serve(state, &config.server.bind).await
}
