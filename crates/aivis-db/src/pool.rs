//! Connection pool, migrations, and liveness checks.

use std::collections::HashSet;
use std::time::Duration;

use aivis_core::AppConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::DbError;

// Resolved relative to crates/aivis-db/Cargo.toml.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Pool sizing; mirrors the `AIVIS_DB_*` settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

/// Opens a Postgres pool.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if no connection can be established within the
/// acquire timeout.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Versions already recorded as applied. Empty on a fresh database, where
/// the bookkeeping table does not exist yet.
async fn applied_versions(pool: &PgPool) -> HashSet<i64> {
    sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations WHERE success")
        .fetch_all(pool)
        .await
        .map(|versions| versions.into_iter().collect())
        .unwrap_or_default()
}

/// Applies pending migrations and returns how many were new.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if a migration fails or the
/// recorded history diverges from the embedded files.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    let before = applied_versions(pool).await;
    MIGRATOR.run(pool).await?;
    Ok(MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration() && !before.contains(&m.version))
        .count())
}

/// Round-trips `SELECT 1` through the pool.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if no connection is available or the query fails.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await?;
    Ok(())
}
