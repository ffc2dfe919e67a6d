//! Postgres backing for the job store.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Connections kept beyond one per worker slot, for API reads and admission.
const SPARE_CONNECTIONS: u32 = 4;

/// Pool for `PgJobStore`, sized so every worker slot can hold a connection
/// while the HTTP surface still gets one.
pub async fn init_pool(database_url: &str, worker_slots: usize) -> Result<PgPool, sqlx::Error> {
    let slots = u32::try_from(worker_slots).unwrap_or(u32::MAX);

    PgPoolOptions::new()
        .max_connections(slots.saturating_add(SPARE_CONNECTIONS))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Create or upgrade the `product_jobs` and `product_cache` tables.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

pub mod queries;
