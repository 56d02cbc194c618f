use futures::future::BoxFuture;
use serde_json::Value;
use sqlx::{Executor, SqliteConnection, SqlitePool};

use crate::error::MIGRATION_FAILED;
use crate::time::now_ms;
use crate::{AppError, AppResult};
use tracing::{error, info, warn};

pub type MigrationFn = for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, AppResult<()>>;

/// One schema step. `up` receives the upgrade transaction's connection and
/// must leave already-migrated data untouched.
#[derive(Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: MigrationFn,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_kv_store",
        up: create_kv_store,
    },
    Migration {
        version: 2,
        name: "certificates_default_status",
        up: certificates_default_status,
    },
    Migration {
        version: 3,
        name: "financial_default_status",
        up: financial_default_status,
    },
];

pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

pub async fn apply_migrations(pool: &SqlitePool) -> AppResult<u32> {
    apply_migration_list(pool, MIGRATIONS).await
}

/// Apply every migration in `list` that is not yet recorded.
///
/// All pending steps and their bookkeeping rows share a single transaction:
/// either the database ends at the newest version or it stays where it was.
pub async fn apply_migration_list(pool: &SqlitePool, list: &[Migration]) -> AppResult<u32> {
    if let Some(pair) = list.windows(2).find(|w| w[0].version >= w[1].version) {
        return Err(AppError::new(
            MIGRATION_FAILED,
            "Migrations must be listed in strictly ascending order.",
        )
        .with_context("previous", pair[0].name)
        .with_context("next", pair[1].name));
    }

    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version    INTEGER PRIMARY KEY,\
           name       TEXT NOT NULL,\
           applied_at INTEGER NOT NULL\
         )",
    )
    .await?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let pending: Vec<&Migration> = list
        .iter()
        .filter(|m| !applied.contains(&i64::from(m.version)))
        .collect();

    if pending.is_empty() {
        let version = current_version(pool).await?;
        info!(target: "fireledger", event = "migration_up_to_date", version);
        return Ok(version);
    }

    let mut tx = pool.begin().await?;
    for migration in &pending {
        info!(
            target: "fireledger",
            event = "migration_begin",
            version = migration.version,
            name = migration.name
        );
        let step = async {
            (migration.up)(&mut *tx).await?;
            sqlx::query(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)",
            )
            .bind(i64::from(migration.version))
            .bind(migration.name)
            .bind(now_ms())
            .execute(&mut *tx)
            .await?;
            Ok::<_, AppError>(())
        };
        if let Err(err) = step.await {
            error!(
                target: "fireledger",
                event = "migration_failed",
                version = migration.version,
                name = migration.name,
                error = %err
            );
            if let Err(rb) = tx.rollback().await {
                error!(target: "fireledger", event = "migration_rollback_failed", error = %rb);
            } else {
                warn!(target: "fireledger", event = "migration_rollback");
            }
            return Err(AppError::new(MIGRATION_FAILED, "Schema upgrade failed.")
                .with_context("version", migration.version.to_string())
                .with_context("name", migration.name)
                .with_cause(err));
        }
    }
    tx.commit().await?;

    let version = current_version(pool).await?;
    info!(
        target: "fireledger",
        event = "migration_applied",
        applied = pending.len(),
        version
    );
    Ok(version)
}

pub async fn current_version(pool: &SqlitePool) -> AppResult<u32> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version.and_then(|v| u32::try_from(v).ok()).unwrap_or(0))
}

fn create_kv_store(conn: &mut SqliteConnection) -> BoxFuture<'_, AppResult<()>> {
    Box::pin(async move {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (\
               key        TEXT PRIMARY KEY NOT NULL,\
               value      TEXT NOT NULL,\
               updated_at INTEGER NOT NULL\
             )",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    })
}

fn certificates_default_status(conn: &mut SqliteConnection) -> BoxFuture<'_, AppResult<()>> {
    Box::pin(async move {
        default_missing_field(conn, "certificates", "status", Value::from("active")).await?;
        Ok(())
    })
}

fn financial_default_status(conn: &mut SqliteConnection) -> BoxFuture<'_, AppResult<()>> {
    Box::pin(async move {
        default_missing_field(conn, "financial", "status", Value::from("pending")).await?;
        Ok(())
    })
}

/// Scan every live and backup record of `collection` and add `field` to the
/// entries that lack it. Rows with nothing to change are not rewritten.
async fn default_missing_field(
    conn: &mut SqliteConnection,
    collection: &str,
    field: &str,
    default: Value,
) -> AppResult<u64> {
    let live_suffix = format!("-{collection}");
    let backup_suffix = format!("-{collection}_backup");

    let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM kv_store")
        .fetch_all(&mut *conn)
        .await?;

    let mut rewritten = 0u64;
    for (key, raw) in rows {
        if !(key.ends_with(&live_suffix) || key.ends_with(&backup_suffix)) {
            continue;
        }
        let mut value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target: "fireledger",
                    event = "migration_row_unparsable",
                    key = %key,
                    error = %err
                );
                continue;
            }
        };
        let Some(items) = value.as_array_mut() else {
            continue;
        };

        let mut changed = false;
        for item in items.iter_mut() {
            if let Some(obj) = item.as_object_mut() {
                if !obj.contains_key(field) {
                    obj.insert(field.to_string(), default.clone());
                    changed = true;
                }
            }
        }
        if !changed {
            continue;
        }

        let encoded = serde_json::to_string(&value)?;
        sqlx::query("UPDATE kv_store SET value = ?, updated_at = ? WHERE key = ?")
            .bind(&encoded)
            .bind(now_ms())
            .bind(&key)
            .execute(&mut *conn)
            .await?;
        rewritten += 1;
    }

    info!(
        target: "fireledger",
        event = "migration_rows_rewritten",
        collection,
        field,
        rewritten
    );
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_list_is_strictly_ascending() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
        assert_eq!(latest_version(), 3);
        assert_eq!(MIGRATIONS[0].name, "create_kv_store");
    }
}
