use encoding_rs::WINDOWS_1252;
use serde::Serialize;
use sqlx::PgConnection;
use tracing::info;

use crate::config::TableTarget;
use crate::error::{Result, SyncError};

/// Undoes the classic UTF-8-read-as-latin-1 corruption (`CooperaÃ§Ã£o`).
///
/// Every char is mapped back to the single byte it was decoded from, and the
/// bytes are decoded again as strict UTF-8. Returns `None` when the text does
/// not look double-encoded, including correctly stored accented text, which
/// does not survive the strict decode.
pub fn repair_text(value: &str) -> Option<String> {
    if value.len() == value.chars().count() {
        return None;
    }

    let mut bytes = Vec::with_capacity(value.len());
    let mut buf = [0u8; 4];
    for ch in value.chars() {
        let code = u32::from(ch);
        if code <= 0xFF {
            bytes.push(code as u8);
            continue;
        }
        // windows-1252 puts typographic chars (‰, ‡, €, ...) in 0x80..=0x9F.
        let (encoded, _, unmappable) = WINDOWS_1252.encode(ch.encode_utf8(&mut buf));
        if unmappable || encoded.len() != 1 {
            return None;
        }
        bytes.push(encoded[0]);
    }

    let repaired = String::from_utf8(bytes).ok()?;
    (repaired != value).then_some(repaired)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairCandidate {
    pub id: i32,
    pub column: &'static str,
    pub original: String,
    pub repaired: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairReport {
    /// Rows whose text columns contain any multi-byte characters.
    pub scanned: usize,
    pub candidates: Vec<RepairCandidate>,
    pub applied: u64,
}

/// Multi-byte text is found by comparing octet and char lengths, which are
/// always equal outside a UTF8 database.
fn require_utf8(server_encoding: &str) -> Result<()> {
    if server_encoding.eq_ignore_ascii_case("UTF8") {
        Ok(())
    } else {
        Err(SyncError::UnsupportedEncoding {
            encoding: server_encoding.to_string(),
        })
    }
}

/// Lists the rows of `target` whose text would change under [`repair_text`].
pub async fn plan_repairs(conn: &mut PgConnection, target: &TableTarget) -> Result<RepairReport> {
    let server_encoding: String = sqlx::query_scalar("SHOW server_encoding")
        .fetch_one(&mut *conn)
        .await?;
    require_utf8(&server_encoding)?;

    let rows: Vec<(i32, Option<String>, Option<String>)> = sqlx::query_as(&format!(
        r#"
        SELECT id, cooperativa, status
        FROM {table}
        WHERE octet_length(cooperativa) > char_length(cooperativa)
           OR octet_length(status) > char_length(status)
        ORDER BY id
        "#,
        table = target.name(),
    ))
    .fetch_all(&mut *conn)
    .await?;

    let mut report = RepairReport {
        scanned: rows.len(),
        ..RepairReport::default()
    };

    for (id, cooperativa, status) in rows {
        for (column, value) in [("cooperativa", cooperativa), ("status", status)] {
            let Some(original) = value else { continue };
            if let Some(repaired) = repair_text(&original) {
                report.candidates.push(RepairCandidate {
                    id,
                    column,
                    original,
                    repaired,
                });
            }
        }
    }

    info!(
        table = target.name(),
        scanned = report.scanned,
        candidates = report.candidates.len(),
        "planned encoding repair"
    );
    Ok(report)
}

/// Writes the planned repairs. A row is only touched if it still holds the
/// text that was planned against.
pub async fn apply_repairs(
    conn: &mut PgConnection,
    target: &TableTarget,
    report: &mut RepairReport,
) -> Result<()> {
    for candidate in &report.candidates {
        let result = sqlx::query(&format!(
            "UPDATE {table} SET {column} = $1 WHERE id = $2 AND {column} = $3",
            table = target.name(),
            column = candidate.column,
        ))
        .bind(&candidate.repaired)
        .bind(candidate.id)
        .bind(&candidate.original)
        .execute(&mut *conn)
        .await?;
        report.applied += result.rows_affected();
    }

    info!(table = target.name(), applied = report.applied, "applied encoding repair");
    Ok(())
}
