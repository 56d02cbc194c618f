#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fireledger_lib::dataset::seed::{DemoSeed, NoSeed};
use fireledger_lib::{AppError, AppResult, KeyValueStore, MemoryStore, Session, StoreHandle};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::sync::Semaphore;

pub async fn memory_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// A memory store plus a handle onto it, so tests can inspect raw records.
pub fn memory_store() -> (Arc<MemoryStore>, StoreHandle) {
    let raw = Arc::new(MemoryStore::default());
    (raw.clone(), StoreHandle::from_store(raw))
}

pub fn plain_session(store: StoreHandle) -> Session {
    Session::new(store, Arc::new(NoSeed))
}

pub fn demo_session(store: StoreHandle) -> Session {
    Session::new(store, Arc::new(DemoSeed::new(["demo"])))
}

/// Memory store whose reads of gated keys block until released.
#[derive(Default)]
pub struct GatedStore {
    inner: MemoryStore,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl GatedStore {
    pub fn gate(&self, key: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Let one blocked (or future) read of `key` through.
    pub fn release(&self, key: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(key) {
            gate.add_permits(1);
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl KeyValueStore for GatedStore {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let gate = self.gates.lock().unwrap().get(key).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &Value) -> AppResult<()> {
        self.inner.set(key, value).await
    }
}

/// Memory store that fails chosen keys, or everything while offline.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
    offline: AtomicBool,
}

impl FlakyStore {
    pub fn offline() -> Self {
        let store = Self::default();
        store.set_offline(true);
        store
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, key: &str) {
        self.failing_reads.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_writes(&self, key: &str) {
        self.failing_writes.lock().unwrap().insert(key.to_string());
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn outage(key: &str) -> AppError {
        AppError::storage_unavailable(AppError::from("simulated outage")).with_context("key", key)
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        if self.offline.load(Ordering::SeqCst) || self.failing_reads.lock().unwrap().contains(key)
        {
            return Err(Self::outage(key));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &Value) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) || self.failing_writes.lock().unwrap().contains(key)
        {
            return Err(Self::outage(key));
        }
        self.inner.set(key, value).await
    }
}
