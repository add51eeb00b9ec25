// src/storage/db.rs
//! Database pool initialization for the credential and nonce ledgers.
//!
//! SQLite by default (`sqlite:dap.db`), with any sqlx-supported URL accepted
//! through `DATABASE_URL`. Schema setup runs through embedded migrations at
//! startup, so a fresh deployment needs no manual DDL step.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Connects the pool and applies pending migrations.
///
/// The database file is created if missing. Timestamps are written as
/// RFC 3339 text with an explicit UTC offset.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    log::info!("database connected and migrated: {}", database_url);

    Ok(pool)
}

/// Liveness probe: runs a trivial query against the pool.
pub async fn ping(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// In-memory pool for tests. A single connection keeps every query on the
/// same transient database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}
