mod common;

use anyhow::Result;
use metasync_core::{sync, KeyScheme, SyncError};

use common::{drop_table, scratch_options, test_pool};

#[tokio::test]
async fn repair_fixes_double_encoded_rows_only_when_applied() -> Result<()> {
    let Some(pool) = test_pool("repair_fixes_double_encoded_rows_only_when_applied").await? else {
        return Ok(());
    };
    let options = scratch_options(KeyScheme::Identifier, 500)?;
    let table = options.target.name();

    sync::ensure_schema(&pool, &options.target).await?;

    let server_encoding: String = sqlx::query_scalar("SHOW server_encoding")
        .fetch_one(&pool)
        .await?;
    if server_encoding != "UTF8" {
        let err = sync::repair_encoding(&pool, &options.target, false)
            .await
            .expect_err("repair cannot see multi-byte text outside UTF8");
        assert!(matches!(err, SyncError::UnsupportedEncoding { .. }), "got {err}");
        drop_table(&pool, &options.target).await?;
        return Ok(());
    }

    sqlx::query(&format!(
        "INSERT INTO {table} (id, cooperativa, meta, status) VALUES
            (1, 'CooperaÃ§Ã£o Norte', 10, 'ATIVO'),
            (2, 'Cooperação Sul', 20, NULL),
            (3, 'Plain Coop', 30, 'EM ANÃLISE')"
    ))
    .execute(&pool)
    .await?;

    let planned = sync::repair_encoding(&pool, &options.target, false).await?;
    assert_eq!(planned.scanned, 3);
    assert_eq!(planned.candidates.len(), 1);
    assert_eq!(planned.candidates[0].id, 1);
    assert_eq!(planned.candidates[0].repaired, "Cooperação Norte");
    assert_eq!(planned.applied, 0);

    let untouched: String =
        sqlx::query_scalar(&format!("SELECT cooperativa FROM {table} WHERE id = 1"))
            .fetch_one(&pool)
            .await?;
    assert_eq!(untouched, "CooperaÃ§Ã£o Norte");

    let applied = sync::repair_encoding(&pool, &options.target, true).await?;
    assert_eq!(applied.applied, 1);

    let fixed: String = sqlx::query_scalar(&format!("SELECT cooperativa FROM {table} WHERE id = 1"))
        .fetch_one(&pool)
        .await?;
    assert_eq!(fixed, "Cooperação Norte");

    let again = sync::repair_encoding(&pool, &options.target, true).await?;
    assert!(again.candidates.is_empty());

    drop_table(&pool, &options.target).await?;
    Ok(())
}
