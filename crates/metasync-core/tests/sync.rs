mod common;

use anyhow::Result;
use chrono::NaiveDate;
use metasync_core::{db, schema, sync, KeyScheme, SyncError};
use metasync_parser::NormalizeError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{drop_table, row_count, scratch_options, table_exists, test_pool};

const SHEET: &str = "\
ID,COOPERATIVA,META,DATA,STATUS
1,Cooperativa Vale Verde,120,2024-01-31,ATIVO
2,Cooperação Sul,12.5,31/01/2024,
3,Coop Norte,40,,INATIVO
,Sem Id,10,2024-02-01,ATIVO
";

#[tokio::test]
async fn resync_with_identical_data_is_idempotent() -> Result<()> {
    let Some(pool) = test_pool("resync_with_identical_data_is_idempotent").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 2)?;

    let first = sync::sync_payload(&pool, &options, SHEET.as_bytes()).await?;
    assert_eq!(first.total_rows, 4);
    assert_eq!(first.valid_rows, 3);
    assert_eq!(first.upsert.processed, 3);
    assert_eq!(first.upsert.inserted, 3);
    assert_eq!(row_count(&pool, &options.target).await?, 3);

    let second = sync::sync_payload(&pool, &options, SHEET.as_bytes()).await?;
    assert_eq!(second.upsert.inserted, 0);
    assert_eq!(second.upsert.updated, 3);
    assert_eq!(row_count(&pool, &options.target).await?, 3);

    drop_table(&pool, &options.target).await?;
    Ok(())
}

#[tokio::test]
async fn identifier_scheme_stores_integer_targets_and_null_status() -> Result<()> {
    let Some(pool) = test_pool("identifier_scheme_stores_integer_targets_and_null_status").await?
    else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 500)?;
    sync::sync_payload(&pool, &options, SHEET.as_bytes()).await?;

    let (cooperativa, meta, data, status): (String, i32, Option<NaiveDate>, Option<String>) =
        sqlx::query_as(&format!(
            "SELECT cooperativa, meta, data, status FROM {} WHERE id = 2",
            options.target.name()
        ))
        .fetch_one(&pool)
        .await?;
    assert_eq!(cooperativa, "Cooperação Sul");
    assert_eq!(meta, 12);
    assert_eq!(data, NaiveDate::from_ymd_opt(2024, 1, 31));
    assert_eq!(status, None);

    let undated: Option<NaiveDate> = sqlx::query_scalar(&format!(
        "SELECT data FROM {} WHERE id = 3",
        options.target.name()
    ))
    .fetch_one(&pool)
    .await?;
    assert_eq!(undated, None);

    drop_table(&pool, &options.target).await?;
    Ok(())
}

#[tokio::test]
async fn repeated_key_keeps_last_value() -> Result<()> {
    let Some(pool) = test_pool("repeated_key_keeps_last_value").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 500)?;
    let sheet = "\
ID,COOPERATIVA,META,DATA,STATUS
7,Coop A,10,2024-01-01,ATIVO
8,Coop B,5,2024-01-01,ATIVO
7,Coop A,20,2024-01-01,ATIVO
";

    let report = sync::sync_payload(&pool, &options, sheet.as_bytes()).await?;
    assert_eq!(report.valid_rows, 3);
    assert_eq!(report.upsert.superseded, 1);
    assert_eq!(report.upsert.processed, 2);

    let meta: i32 = sqlx::query_scalar(&format!(
        "SELECT meta FROM {} WHERE id = 7",
        options.target.name()
    ))
    .fetch_one(&pool)
    .await?;
    assert_eq!(meta, 20);
    assert_eq!(row_count(&pool, &options.target).await?, 2);

    drop_table(&pool, &options.target).await?;
    Ok(())
}

#[tokio::test]
async fn missing_cooperative_column_aborts_before_any_write() -> Result<()> {
    let Some(pool) = test_pool("missing_cooperative_column_aborts_before_any_write").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 500)?;
    let sheet = "ID,META,DATA,STATUS\n1,10,2024-01-01,ATIVO\n";

    let err = sync::sync_payload(&pool, &options, sheet.as_bytes())
        .await
        .expect_err("sheet without COOPERATIVA must be rejected");
    match err {
        SyncError::Normalize(NormalizeError::MissingColumns { missing }) => {
            assert_eq!(missing, vec!["COOPERATIVA"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!table_exists(&pool, &options.target).await?);
    Ok(())
}

#[tokio::test]
async fn rows_removed_from_sheet_are_kept() -> Result<()> {
    let Some(pool) = test_pool("rows_removed_from_sheet_are_kept").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 500)?;

    sync::sync_payload(&pool, &options, SHEET.as_bytes()).await?;
    let shorter = "ID,COOPERATIVA,META,DATA,STATUS\n1,Cooperativa Vale Verde,130,2024-01-31,ATIVO\n";
    let report = sync::sync_payload(&pool, &options, shorter.as_bytes()).await?;

    assert_eq!(report.upsert.updated, 1);
    assert_eq!(row_count(&pool, &options.target).await?, 3);

    drop_table(&pool, &options.target).await?;
    Ok(())
}

#[tokio::test]
async fn surrogate_scheme_keys_on_cooperative_and_date() -> Result<()> {
    let Some(pool) = test_pool("surrogate_scheme_keys_on_cooperative_and_date").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Surrogate, 500)?;
    let sheet = "\
cooperativa,meta,data,status
Coop A,12.5,2024-01-01,
Coop A,7,2024-01-02,PAUSADO
Coop B,3,,ATIVO
";

    let report = sync::sync_payload(&pool, &options, sheet.as_bytes()).await?;
    assert_eq!(report.valid_rows, 2);
    assert_eq!(report.dropped.len(), 1);

    let (meta, status): (Decimal, Option<String>) = sqlx::query_as(&format!(
        "SELECT meta, status FROM {} WHERE cooperativa = 'Coop A' AND data = '2024-01-01'",
        options.target.name()
    ))
    .fetch_one(&pool)
    .await?;
    assert_eq!(meta, dec!(12.5));
    assert_eq!(status.as_deref(), Some("ATIVO"));

    let update = "cooperativa,meta,data,status\nCoop A,99.9,2024-01-01,INATIVO\n";
    let report = sync::sync_payload(&pool, &options, update.as_bytes()).await?;
    assert_eq!(report.upsert.updated, 1);
    assert_eq!(row_count(&pool, &options.target).await?, 2);

    let meta: Decimal = sqlx::query_scalar(&format!(
        "SELECT meta FROM {} WHERE cooperativa = 'Coop A' AND data = '2024-01-01'",
        options.target.name()
    ))
    .fetch_one(&pool)
    .await?;
    assert_eq!(meta, dec!(99.9));

    drop_table(&pool, &options.target).await?;
    Ok(())
}

#[tokio::test]
async fn schema_ensure_is_repeatable() -> Result<()> {
    let Some(pool) = test_pool("schema_ensure_is_repeatable").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Surrogate, 500)?;

    sync::ensure_schema(&pool, &options.target).await?;
    sync::ensure_schema(&pool, &options.target).await?;

    let mut conn = pool.acquire().await?;
    assert!(schema::constraint_exists(&mut conn, &options.target).await?);
    drop(conn);

    let constraints: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pg_constraint WHERE conrelid = to_regclass($1) AND contype = 'u'",
    )
    .bind(options.target.name())
    .fetch_one(&pool)
    .await?;
    assert_eq!(constraints, 1);

    drop_table(&pool, &options.target).await?;
    Ok(())
}

#[tokio::test]
async fn concurrent_run_on_same_table_is_rejected() -> Result<()> {
    let Some(pool) = test_pool("concurrent_run_on_same_table_is_rejected").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 500)?;

    let mut holder = pool.begin().await?;
    db::lock_table(&mut holder, options.target.name()).await?;

    let err = sync::sync_payload(&pool, &options, SHEET.as_bytes())
        .await
        .expect_err("second run must not proceed while the lock is held");
    assert!(matches!(err, SyncError::RunInProgress { .. }), "got {err}");
    holder.rollback().await?;

    let report = sync::sync_payload(&pool, &options, SHEET.as_bytes()).await?;
    assert_eq!(report.upsert.processed, 3);
    assert_eq!(report.upsert.inserted, 3);

    drop_table(&pool, &options.target).await?;
    Ok(())
}

#[tokio::test]
async fn oversized_batch_is_split_to_fit_one_statement() -> Result<()> {
    let Some(pool) = test_pool("oversized_batch_is_split_to_fit_one_statement").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 20_000)?;

    let mut sheet = String::from("ID,COOPERATIVA,META,DATA,STATUS\n");
    for id in 1..=14_000 {
        sheet.push_str(&format!("{id},Coop {id},{id},2024-01-01,ATIVO\n"));
    }

    let report = sync::sync_payload(&pool, &options, sheet.as_bytes()).await?;
    assert_eq!(report.upsert.processed, 14_000);
    assert_eq!(report.upsert.inserted, 14_000);
    assert_eq!(row_count(&pool, &options.target).await?, 14_000);

    drop_table(&pool, &options.target).await?;
    Ok(())
}
