#[path = "util.rs"]
mod util;

use anyhow::Result;
use fireledger_lib::error::MIGRATION_FAILED;
use fireledger_lib::migrate::{self, Migration, MIGRATIONS};
use fireledger_lib::{AppError, AppResult};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use sqlx::{SqliteConnection, SqlitePool};

async fn insert_row(pool: &SqlitePool, key: &str, value: Value) -> Result<()> {
    sqlx::query("INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, 1)")
        .bind(key)
        .bind(value.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

async fn read_row(pool: &SqlitePool, key: &str) -> Result<(Value, i64)> {
    let (raw, updated_at): (String, i64) =
        sqlx::query_as("SELECT value, updated_at FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_one(pool)
            .await?;
    Ok((serde_json::from_str(&raw)?, updated_at))
}

fn write_then_fail(conn: &mut SqliteConnection) -> BoxFuture<'_, AppResult<()>> {
    Box::pin(async move {
        sqlx::query("INSERT INTO kv_store (key, value, updated_at) VALUES ('u1-clients', '[]', 0)")
            .execute(&mut *conn)
            .await?;
        Err(AppError::new("TEST/BOOM", "step exploded"))
    })
}

#[tokio::test]
async fn fresh_database_reaches_latest_and_reruns_are_no_ops() -> Result<()> {
    let pool = util::memory_pool().await?;

    assert_eq!(migrate::apply_migrations(&pool).await?, 3);
    assert_eq!(migrate::apply_migrations(&pool).await?, 3);

    let recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(&pool)
        .await?;
    assert_eq!(recorded, 3);
    Ok(())
}

#[tokio::test]
async fn legacy_rows_gain_default_status() -> Result<()> {
    let pool = util::memory_pool().await?;
    migrate::apply_migration_list(&pool, &MIGRATIONS[..1]).await?;

    insert_row(
        &pool,
        "u1-certificates",
        json!([{ "id": "cert-1" }, { "id": "cert-2", "status": "revoked" }]),
    )
    .await?;
    insert_row(&pool, "u1-certificates_backup", json!([{ "id": "cert-1" }])).await?;
    insert_row(&pool, "u1-financial", json!([{ "id": "fin-1", "amount": 10 }])).await?;
    insert_row(&pool, "u1-clients", json!([{ "id": "cli-1" }])).await?;

    assert_eq!(migrate::apply_migrations(&pool).await?, 3);

    let (certs, _) = read_row(&pool, "u1-certificates").await?;
    assert_eq!(certs[0]["status"], json!("active"));
    assert_eq!(certs[1]["status"], json!("revoked"));
    let (backup, _) = read_row(&pool, "u1-certificates_backup").await?;
    assert_eq!(backup[0]["status"], json!("active"));
    let (financial, _) = read_row(&pool, "u1-financial").await?;
    assert_eq!(financial[0]["status"], json!("pending"));
    let (clients, _) = read_row(&pool, "u1-clients").await?;
    assert_eq!(clients, json!([{ "id": "cli-1" }]));
    Ok(())
}

#[tokio::test]
async fn rerunning_data_migrations_leaves_tagged_rows_untouched() -> Result<()> {
    let pool = util::memory_pool().await?;
    migrate::apply_migration_list(&pool, &MIGRATIONS[..1]).await?;
    insert_row(&pool, "u1-certificates", json!([{ "id": "cert-1" }])).await?;
    migrate::apply_migrations(&pool).await?;
    let before = read_row(&pool, "u1-certificates").await?;

    // Forget the data migrations so they run again over migrated rows.
    sqlx::query("DELETE FROM schema_migrations WHERE version > 1")
        .execute(&pool)
        .await?;
    migrate::apply_migrations(&pool).await?;

    let after = read_row(&pool, "u1-certificates").await?;
    assert_eq!(before, after);
    assert_eq!(after.0, json!([{ "id": "cert-1", "status": "active" }]));
    Ok(())
}

#[tokio::test]
async fn failing_step_rolls_back_the_whole_upgrade() -> Result<()> {
    let pool = util::memory_pool().await?;
    let list = [
        MIGRATIONS[0],
        Migration {
            version: 2,
            name: "write_then_fail",
            up: write_then_fail,
        },
    ];

    let err = migrate::apply_migration_list(&pool, &list)
        .await
        .expect_err("second step fails");
    assert_eq!(err.code(), MIGRATION_FAILED);
    assert_eq!(err.context().get("name"), Some(&"write_then_fail".to_string()));
    assert_eq!(migrate::current_version(&pool).await?, 0);

    let tables: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE name = 'kv_store'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(tables, 0, "table creation rolled back with the failed step");
    Ok(())
}

#[tokio::test]
async fn failure_after_earlier_upgrade_keeps_previous_version() -> Result<()> {
    let pool = util::memory_pool().await?;
    migrate::apply_migration_list(&pool, &MIGRATIONS[..1]).await?;

    let list = [
        MIGRATIONS[0],
        Migration {
            version: 2,
            name: "write_then_fail",
            up: write_then_fail,
        },
    ];
    migrate::apply_migration_list(&pool, &list)
        .await
        .expect_err("second step fails");

    assert_eq!(migrate::current_version(&pool).await?, 1);
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_store")
        .fetch_one(&pool)
        .await?;
    assert_eq!(rows, 0);
    Ok(())
}

#[tokio::test]
async fn out_of_order_list_is_rejected() -> Result<()> {
    let pool = util::memory_pool().await?;
    let list = [MIGRATIONS[1], MIGRATIONS[0]];
    let err = migrate::apply_migration_list(&pool, &list)
        .await
        .expect_err("descending versions");
    assert_eq!(err.code(), MIGRATION_FAILED);
    Ok(())
}
