use chrono::{DateTime, Utc};
use metasync_parser::{normalize_payload, DroppedRow, KeyScheme, NormalizedSheet};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::{SyncConfig, TableTarget};
use crate::db::{self, DbPool};
use crate::error::Result;
use crate::fetch;
use crate::repair::{self, RepairReport};
use crate::schema;
use crate::upsert::{self, UpsertOutcome};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub target: TableTarget,
    pub batch_size: usize,
}

impl From<&SyncConfig> for SyncOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            target: config.target.clone(),
            batch_size: config.batch_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub table: String,
    pub scheme: KeyScheme,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub dropped: Vec<DroppedRow>,
    pub upsert: UpsertOutcome,
    pub finished_at: DateTime<Utc>,
}

/// The whole job: load the sheet, normalize it, then write it in one
/// transaction. The payload is validated before a connection is opened, so a
/// bad sheet never reaches the database.
pub async fn run(config: &SyncConfig) -> Result<SyncReport> {
    let payload = fetch::load_payload(&config.source).await?;
    let sheet = preview(&payload, config.target.scheme)?;

    let pool = db::connect(&config.database).await?;
    let report = sync_sheet(&pool, &SyncOptions::from(config), sheet).await;
    pool.close().await;
    report
}

/// Normalizes `payload` and synchronizes it through an existing pool.
pub async fn sync_payload(
    pool: &DbPool,
    options: &SyncOptions,
    payload: &[u8],
) -> Result<SyncReport> {
    let sheet = preview(payload, options.target.scheme)?;
    sync_sheet(pool, options, sheet).await
}

/// Normalizes without touching the database.
pub fn preview(payload: &[u8], scheme: KeyScheme) -> Result<NormalizedSheet> {
    let sheet = normalize_payload(payload, scheme)?;
    info!(
        total = sheet.total_rows,
        valid = sheet.valid_rows(),
        dropped = sheet.dropped.len(),
        "sheet normalized"
    );
    Ok(sheet)
}

async fn sync_sheet(
    pool: &DbPool,
    options: &SyncOptions,
    sheet: NormalizedSheet,
) -> Result<SyncReport> {
    let run_id = Uuid::new_v4();
    let target = &options.target;

    let mut tx = pool.begin().await?;
    db::lock_table(&mut tx, target.name()).await?;
    schema::ensure_schema(&mut tx, target).await?;
    let upsert =
        upsert::upsert_records(&mut tx, target, &sheet.records, options.batch_size).await?;
    tx.commit().await?;

    info!(%run_id, table = target.name(), processed = upsert.processed, "sync committed");

    Ok(SyncReport {
        run_id,
        table: target.name().to_string(),
        scheme: target.scheme,
        total_rows: sheet.total_rows,
        valid_rows: sheet.valid_rows(),
        dropped: sheet.dropped,
        upsert,
        finished_at: Utc::now(),
    })
}

/// Runs only the schema stage, under the same lock as a sync.
pub async fn ensure_schema(pool: &DbPool, target: &TableTarget) -> Result<()> {
    let mut tx = pool.begin().await?;
    db::lock_table(&mut tx, target.name()).await?;
    schema::ensure_schema(&mut tx, target).await?;
    tx.commit().await?;
    Ok(())
}

/// Plans, and with `apply` writes, the one-time encoding repair of `target`.
pub async fn repair_encoding(
    pool: &DbPool,
    target: &TableTarget,
    apply: bool,
) -> Result<RepairReport> {
    let mut tx = pool.begin().await?;
    db::lock_table(&mut tx, target.name()).await?;
    let mut report = repair::plan_repairs(&mut tx, target).await?;
    if apply {
        repair::apply_repairs(&mut tx, target, &mut report).await?;
    }
    tx.commit().await?;
    Ok(report)
}
