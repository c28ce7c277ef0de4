use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgConnection, Pool, Postgres};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{Result, SyncError};

pub type DbPool = Pool<Postgres>;

// First half of the two-key advisory lock; the second half is hashtext(table).
const RUN_LOCK_CLASS: i32 = 0x4D53_594E; // "MSYN"

/// Opens a small pool; a run is sequential and only ever holds one connection.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .map_err(SyncError::Connect)?;

    info!(?config, "connected to Postgres");
    Ok(pool)
}

pub async fn connect_url(database_url: &str) -> Result<DbPool> {
    connect(&DatabaseConfig::Url(database_url.to_string())).await
}

/// Takes the per-table single-flight lock for the current transaction.
///
/// The lock is released by commit or rollback, so a crashed run never leaves
/// it behind. Fails with [`SyncError::RunInProgress`] instead of waiting.
pub async fn lock_table(conn: &mut PgConnection, table: &str) -> Result<()> {
    let acquired: bool =
        sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1, hashtext($2))")
            .bind(RUN_LOCK_CLASS)
            .bind(table)
            .fetch_one(&mut *conn)
            .await?;

    if !acquired {
        return Err(SyncError::RunInProgress {
            table: table.to_string(),
        });
    }
    Ok(())
}
