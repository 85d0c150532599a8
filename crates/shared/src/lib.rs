//! Shared infrastructure for the AeroScout backend.
//!
//! Database pool construction and embedded migrations. Kept separate from
//! the billing crate so binaries can connect without pulling in provider
//! integrations.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the application connection pool.
///
/// Sized for webhook traffic: deliveries are short-lived single-row
/// upserts, so a small pool is sufficient.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run embedded migrations against the given pool.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(pool).await
}
