use metasync_parser::{KeyScheme, DEFAULT_STATUS};
use sqlx::PgConnection;
use tracing::info;

use crate::config::TableTarget;
use crate::error::Result;

/// Creates the destination table, and in the surrogate scheme its
/// `(cooperativa, data)` uniqueness constraint, when they do not exist yet.
/// Running it again is a no-op.
pub async fn ensure_schema(conn: &mut PgConnection, target: &TableTarget) -> Result<()> {
    sqlx::query(&create_table_sql(target))
        .execute(&mut *conn)
        .await?;

    if target.scheme == KeyScheme::Surrogate {
        ensure_unique_constraint(conn, target).await?;
    }

    info!(table = target.name(), scheme = %target.scheme, "destination schema ready");
    Ok(())
}

pub async fn constraint_exists(conn: &mut PgConnection, target: &TableTarget) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_constraint
            WHERE conrelid = to_regclass($1)
              AND conname = $2
        )
        "#,
    )
    .bind(target.name())
    .bind(target.constraint_name())
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

async fn ensure_unique_constraint(conn: &mut PgConnection, target: &TableTarget) -> Result<()> {
    if constraint_exists(conn, target).await? {
        return Ok(());
    }

    let constraint = target.constraint_name();
    sqlx::query(&format!(
        "ALTER TABLE {table} ADD CONSTRAINT {constraint} UNIQUE (cooperativa, data)",
        table = target.name(),
    ))
    .execute(&mut *conn)
    .await?;

    info!(table = target.name(), constraint = %constraint, "created uniqueness constraint");
    Ok(())
}

fn create_table_sql(target: &TableTarget) -> String {
    match target.scheme {
        KeyScheme::Identifier => format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INT PRIMARY KEY,
                cooperativa TEXT NOT NULL,
                meta INT NOT NULL DEFAULT 0,
                data DATE,
                status TEXT
            )
            "#,
            table = target.name(),
        ),
        KeyScheme::Surrogate => format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id SERIAL PRIMARY KEY,
                cooperativa TEXT,
                meta NUMERIC,
                data DATE,
                status TEXT DEFAULT '{DEFAULT_STATUS}'
            )
            "#,
            table = target.name(),
        ),
    }
}
