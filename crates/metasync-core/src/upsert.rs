use std::collections::HashSet;

use chrono::NaiveDate;
use metasync_parser::{GoalRecord, KeyScheme};
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use crate::config::TableTarget;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    /// Rows sent to the database after duplicate keys were collapsed.
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Sheet rows overwritten by a later row with the same key.
    pub superseded: usize,
}

// Postgres caps the number of bind parameters in one statement.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Largest page that stays under the bind parameter limit for `scheme`.
pub fn max_rows_per_statement(scheme: KeyScheme) -> usize {
    let columns = match scheme {
        KeyScheme::Identifier => 5,
        KeyScheme::Surrogate => 4,
    };
    MAX_BIND_PARAMS / columns
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum RecordKey<'a> {
    Id(Option<i32>),
    Composite(&'a str, Option<NaiveDate>),
}

fn record_key(record: &GoalRecord, scheme: KeyScheme) -> RecordKey<'_> {
    match scheme {
        KeyScheme::Identifier => RecordKey::Id(record.id),
        KeyScheme::Surrogate => RecordKey::Composite(&record.cooperative, record.date),
    }
}

/// Keeps only the last occurrence of each key, in the order those last
/// occurrences appear. Returns the survivors and how many rows were dropped.
///
/// A single `INSERT ... ON CONFLICT DO UPDATE` may not touch the same row
/// twice, so this has to happen before rows are paged.
pub fn collapse_duplicates(records: &[GoalRecord], scheme: KeyScheme) -> (Vec<&GoalRecord>, usize) {
    let mut seen = HashSet::with_capacity(records.len());
    let mut survivors: Vec<&GoalRecord> = records
        .iter()
        .rev()
        .filter(|record| seen.insert(record_key(*record, scheme)))
        .collect();
    survivors.reverse();

    let superseded = records.len() - survivors.len();
    (survivors, superseded)
}

/// Upserts `records` in pages of `batch_size` rows on the caller's
/// connection. Nothing is committed here; the caller owns the transaction.
pub async fn upsert_records(
    conn: &mut PgConnection,
    target: &TableTarget,
    records: &[GoalRecord],
    batch_size: usize,
) -> Result<UpsertOutcome> {
    let (unique, superseded) = collapse_duplicates(records, target.scheme);
    if superseded > 0 {
        warn!(superseded, "sheet repeats some keys; keeping the last occurrence of each");
    }

    let mut outcome = UpsertOutcome {
        superseded,
        ..UpsertOutcome::default()
    };

    let page_size = batch_size.clamp(1, max_rows_per_statement(target.scheme));
    if page_size != batch_size {
        warn!(requested = batch_size, page_size, "batch size adjusted to fit one statement");
    }

    for (page_index, page) in unique.chunks(page_size).enumerate() {
        let mut builder = QueryBuilder::<Postgres>::new(insert_prefix(target));
        match target.scheme {
            KeyScheme::Identifier => builder.push_values(page, |mut row, record| {
                row.push_bind(record.id)
                    .push_bind(record.cooperative.as_str())
                    .push_bind(record.target.to_i32().unwrap_or_default())
                    .push_bind(record.date)
                    .push_bind(record.status.as_deref());
            }),
            KeyScheme::Surrogate => builder.push_values(page, |mut row, record| {
                row.push_bind(record.cooperative.as_str())
                    .push_bind(record.target)
                    .push_bind(record.date)
                    .push_bind(record.status.as_deref());
            }),
        };
        builder.push(conflict_clause(target.scheme));
        // xmax is zero only for tuples this statement inserted.
        builder.push(" RETURNING (xmax = 0) AS inserted");

        let flags: Vec<bool> = builder
            .build_query_scalar::<bool>()
            .fetch_all(&mut *conn)
            .await?;

        let inserted = flags.iter().filter(|inserted| **inserted).count();
        outcome.processed += flags.len();
        outcome.inserted += inserted;
        outcome.updated += flags.len() - inserted;
        debug!(page = page_index, rows = flags.len(), inserted, "upserted page");
    }

    info!(
        table = target.name(),
        processed = outcome.processed,
        inserted = outcome.inserted,
        updated = outcome.updated,
        "upsert finished"
    );
    Ok(outcome)
}

fn insert_prefix(target: &TableTarget) -> String {
    match target.scheme {
        KeyScheme::Identifier => format!(
            "INSERT INTO {} (id, cooperativa, meta, data, status) ",
            target.name()
        ),
        KeyScheme::Surrogate => format!(
            "INSERT INTO {} (cooperativa, meta, data, status) ",
            target.name()
        ),
    }
}

fn conflict_clause(scheme: KeyScheme) -> &'static str {
    match scheme {
        KeyScheme::Identifier => {
            r#"
            ON CONFLICT (id)
            DO UPDATE SET
                cooperativa = EXCLUDED.cooperativa,
                meta = EXCLUDED.meta,
                data = EXCLUDED.data,
                status = EXCLUDED.status
            "#
        }
        KeyScheme::Surrogate => {
            r#"
            ON CONFLICT (cooperativa, data)
            DO UPDATE SET
                meta = EXCLUDED.meta,
                status = EXCLUDED.status
            "#
        }
    }
}
