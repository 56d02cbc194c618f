use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

use crate::config::DbLocation;
use crate::{AppError, AppResult};

pub async fn open_sqlite_pool(
    location: &DbLocation,
    max_connections: u32,
) -> AppResult<Pool<Sqlite>> {
    let pool = match location {
        DbLocation::Memory => {
            let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
            // Every connection to `:memory:` is a separate database, so the
            // pool must hold exactly one connection and never recycle it.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?
        }
        DbLocation::File(db_path) => {
            if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    tracing::error!(
                        target: "fireledger",
                        event = "db_dir_create_failed",
                        error = %e,
                        path = %parent.display()
                    );
                    AppError::from(e).with_context("path", parent.display().to_string())
                })?;
            }
            tracing::info!(target: "fireledger", event = "db_path", path = %db_path.display());

            let opts = SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Full)
                .busy_timeout(Duration::from_millis(5000));

            SqlitePoolOptions::new()
                .max_connections(max_connections.max(1))
                .connect_with(opts)
                .await?
        }
    };

    log_effective_pragmas(&pool, location).await;

    Ok(pool)
}

/// Read one scalar setting; `None` if the query fails.
async fn read_setting<T>(pool: &Pool<Sqlite>, sql: &'static str) -> Option<T>
where
    T: Send + Unpin + for<'r> sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    sqlx::query_scalar(sql).fetch_one(pool).await.ok()
}

async fn log_effective_pragmas(pool: &Pool<Sqlite>, location: &DbLocation) {
    let version: Option<String> = read_setting(pool, "SELECT sqlite_version()").await;
    let journal_mode: Option<String> = read_setting(pool, "PRAGMA journal_mode").await;
    let synchronous: Option<i64> = read_setting(pool, "PRAGMA synchronous").await;
    let busy_timeout: Option<i64> = read_setting(pool, "PRAGMA busy_timeout").await;

    tracing::info!(
        target: "fireledger",
        event = "db_open",
        in_memory = matches!(location, DbLocation::Memory),
        sqlite_version = ?version,
        journal_mode = ?journal_mode,
        synchronous = ?synchronous,
        busy_timeout_ms = ?busy_timeout
    );

    let wal = journal_mode.is_some_and(|mode| mode.eq_ignore_ascii_case("wal"));
    if matches!(location, DbLocation::File(_)) && !wal {
        tracing::warn!(
            target: "fireledger",
            event = "db_not_wal",
            "file database is not in WAL mode; crash safety is reduced"
        );
    }
}
