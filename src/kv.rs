use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{DbLocation, StoreConfig};
use crate::time::now_ms;
use crate::{db, migrate, AppError, AppResult};

/// Asynchronous string-keyed record store.
///
/// `get` on an absent key yields `Ok(None)`; `set` always overwrites.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Value>>;
    async fn set(&self, key: &str, value: &Value) -> AppResult<()>;
}

/// SQLite-backed store. The pool is opened (and migrated) on first use and
/// then shared by every caller for the lifetime of the store.
pub struct SqliteStore {
    location: DbLocation,
    max_connections: u32,
    pool: OnceCell<SqlitePool>,
    open_attempts: AtomicU32,
}

impl SqliteStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            location: config.location.clone(),
            max_connections: config.max_connections,
            pool: OnceCell::new(),
            open_attempts: AtomicU32::new(0),
        }
    }

    /// Resolve the shared pool, opening it if this is the first access.
    ///
    /// Concurrent first callers all await the same initialisation. A failed
    /// open is not cached; the next call tries again.
    pub async fn pool(&self) -> AppResult<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                self.open_attempts.fetch_add(1, Ordering::SeqCst);
                let pool = db::open_sqlite_pool(&self.location, self.max_connections)
                    .await
                    .map_err(AppError::storage_unavailable)?;
                if let Err(err) = migrate::apply_migrations(&pool).await {
                    pool.close().await;
                    return Err(AppError::storage_unavailable(err));
                }
                info!(target: "fireledger", event = "kv_store_ready");
                Ok(pool)
            })
            .await
            .map_err(|err| {
                warn!(target: "fireledger", event = "kv_store_open_failed", error = %err);
                err
            })
    }

    /// Number of times an open has been attempted.
    pub fn open_attempts(&self) -> u32 {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.pool.initialized()
    }

    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let pool = self.pool().await?;
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;
        match raw {
            Some(text) => {
                let value = serde_json::from_str(&text)
                    .map_err(|err| AppError::from(err).with_context("key", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> AppResult<()> {
        let pool = self.pool().await?;
        let encoded = serde_json::to_string(value)?;
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)\
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&encoded)
        .bind(now_ms())
        .execute(pool)
        .await?;
        debug!(target: "fireledger", event = "kv_set", key = %key, bytes = encoded.len());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.data.lock().map(|guard| guard.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data
            .lock()
            .map(|guard| guard.contains_key(key))
            .unwrap_or_default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> AppResult<()> {
        let mut guard = self.data.lock().unwrap_or_else(|e| e.into_inner());
        guard.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// Cheap, cloneable handle shared by every cell, the backup sentinel and tools.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn KeyValueStore>,
}

impl StoreHandle {
    pub fn sqlite(config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(SqliteStore::new(config)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(MemoryStore::default()),
        }
    }

    pub fn from_store(store: Arc<dyn KeyValueStore>) -> Self {
        Self { inner: store }
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        self.inner.get(key).await
    }

    pub async fn set(&self, key: &str, value: &Value) -> AppResult<()> {
        self.inner.set(key, value).await
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}
