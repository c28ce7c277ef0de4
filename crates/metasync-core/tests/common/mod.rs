use std::env;

use anyhow::Result;
use metasync_core::{
    db::{self, DbPool},
    sync::SyncOptions,
    KeyScheme, TableTarget,
};
use uuid::Uuid;

/// Connects to the test database, or returns `None` (after saying why) so the
/// caller can skip.
pub async fn test_pool(test_name: &str) -> Result<Option<DbPool>> {
    let database_url = match env::var("METASYNC_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping {test_name} because METASYNC_TEST_DATABASE_URL is not set");
            return Ok(None);
        }
    };
    Ok(Some(db::connect_url(&database_url).await?))
}

/// A throwaway table per test so tests can run in parallel.
pub fn scratch_options(scheme: KeyScheme, batch_size: usize) -> Result<SyncOptions> {
    let name = format!("metasync_test_{}", Uuid::new_v4().simple());
    Ok(SyncOptions {
        target: TableTarget::new(&name, scheme)?,
        batch_size,
    })
}

pub async fn drop_table(pool: &DbPool, target: &TableTarget) -> Result<()> {
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", target.name()))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn row_count(pool: &DbPool, target: &TableTarget) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", target.name()))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn table_exists(pool: &DbPool, target: &TableTarget) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(target.name())
        .fetch_one(pool)
        .await?;
    Ok(exists)
}
