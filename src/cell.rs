//! Reactive persistent cell: one logical stored value bound to a namespaced key.
//!
//! A cell loads its value when bound to a key, exposes it through a `watch`
//! channel, and writes every later mutation back to the store. These rules
//! keep stored data safe:
//!
//! * mutations made before the load resolves stay in memory only, so a default
//!   can never overwrite a value that has not been read yet;
//! * the guest namespace is never written;
//! * a stored value that does not decode is never overwritten. The cell runs
//!   on its initial value in memory and every write reports
//!   `STORAGE/WRITE_FAILED` until a later bind decodes cleanly.
//!
//! Rebinding bumps a generation counter; a load that resolves after a newer
//! bind has started is discarded.

use std::sync::Mutex;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::STORAGE_UNDECODABLE;
use crate::kv::StoreHandle;
use crate::namespace::Namespace;
use crate::{AppError, AppResult};

/// How a bind resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The stored value was applied.
    Stored,
    /// Nothing was stored; the initial value was applied.
    Defaulted,
    /// A stored value exists but does not decode. The initial value was
    /// applied in memory and the stored value is protected from writes.
    Undecodable,
    /// The store failed; the initial value was applied and the cell runs in memory.
    Failed,
    /// A newer bind started before this one resolved; its result was dropped.
    Superseded,
}

#[derive(Debug, Default)]
struct CellMeta {
    key: Option<String>,
    loaded: bool,
    generation: u64,
    /// False for the guest namespace.
    durable: bool,
    outcome: Option<LoadOutcome>,
}

pub struct PersistentCell<T> {
    name: &'static str,
    store: StoreHandle,
    initial: T,
    value: watch::Sender<T>,
    meta: Mutex<CellMeta>,
    write_lock: tokio::sync::Mutex<()>,
}

impl<T> PersistentCell<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(store: StoreHandle, name: &'static str, initial: T) -> Self {
        let (value, _) = watch::channel(initial.clone());
        Self {
            name,
            store,
            initial,
            value,
            meta: Mutex::new(CellMeta::default()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn key(&self) -> Option<String> {
        self.lock_meta().key.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.lock_meta().loaded
    }

    /// How the most recent bind resolved, `None` while it is still loading.
    pub fn load_outcome(&self) -> Option<LoadOutcome> {
        let meta = self.lock_meta();
        meta.loaded.then_some(meta.outcome).flatten()
    }

    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.value.borrow())
    }

    /// Receiver notified on every change, including loads.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value.subscribe()
    }

    /// Point the cell at its key in `namespace` and load it.
    pub async fn bind(&self, namespace: &Namespace) -> LoadOutcome {
        let key = namespace.key(self.name);
        let generation = {
            let mut meta = self.lock_meta();
            meta.generation += 1;
            meta.key = Some(key.clone());
            meta.loaded = false;
            meta.durable = !namespace.is_guest();
            meta.outcome = None;
            meta.generation
        };

        let fetched = self.store.get(&key).await;

        let mut meta = self.lock_meta();
        if meta.generation != generation {
            debug!(
                target: "fireledger",
                event = "cell_load_superseded",
                key = %key,
                generation
            );
            return LoadOutcome::Superseded;
        }

        let (value, outcome) = match fetched {
            Ok(Some(raw)) => match serde_json::from_value::<T>(raw) {
                Ok(value) => (value, LoadOutcome::Stored),
                Err(err) => {
                    warn!(
                        target: "fireledger",
                        event = "cell_decode_fallback",
                        key = %key,
                        error = %err
                    );
                    (self.initial.clone(), LoadOutcome::Undecodable)
                }
            },
            Ok(None) => (self.initial.clone(), LoadOutcome::Defaulted),
            Err(err) => {
                warn!(
                    target: "fireledger",
                    event = "cell_load_failed",
                    key = %key,
                    error = %err
                );
                (self.initial.clone(), LoadOutcome::Failed)
            }
        };
        self.value.send_replace(value);
        meta.loaded = true;
        meta.outcome = Some(outcome);
        debug!(target: "fireledger", event = "cell_loaded", key = %key, outcome = ?outcome);
        outcome
    }

    pub async fn set(&self, value: T) -> AppResult<()> {
        self.update(move |current| *current = value).await
    }

    /// Mutate the value in place and persist the result.
    ///
    /// The in-memory value always changes. It is written to the store only
    /// once the cell has loaded and its key is outside the guest namespace.
    /// A failed write is reported as `STORAGE/WRITE_FAILED` and the in-memory
    /// value is kept. The same error is returned, without touching the store,
    /// while the key holds a value that did not decode.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> AppResult<R> {
        self.commit(|value| (f(value), true)).await
    }

    /// Like [`update`](Self::update), but `f` returning `None` discards the
    /// mutation: nothing is published and nothing is written.
    pub async fn try_update<R>(
        &self,
        f: impl FnOnce(&mut T) -> Option<R>,
    ) -> AppResult<Option<R>> {
        self.commit(|value| match f(value) {
            Some(result) => (Some(result), true),
            None => (None, false),
        })
        .await
    }

    async fn commit<R>(&self, f: impl FnOnce(&mut T) -> (R, bool)) -> AppResult<R> {
        // Held across the write so one cell's writes land in mutation order.
        let _write = self.write_lock.lock().await;

        let (result, pending) = {
            let meta = self.lock_meta();
            let mut next = self.value.borrow().clone();
            let (result, changed) = f(&mut next);
            if !changed {
                return Ok(result);
            }
            self.value.send_replace(next.clone());
            let pending = match (&meta.key, meta.loaded) {
                (Some(key), true)
                    if meta.durable && meta.outcome == Some(LoadOutcome::Undecodable) =>
                {
                    warn!(
                        target: "fireledger",
                        event = "cell_write_blocked",
                        key = %key
                    );
                    return Err(AppError::write_failed(
                        key,
                        AppError::new(
                            STORAGE_UNDECODABLE,
                            "The stored value could not be read and is left untouched.",
                        ),
                    ));
                }
                (Some(key), true) if meta.durable => Some((key.clone(), next)),
                _ => {
                    debug!(
                        target: "fireledger",
                        event = "cell_write_in_memory_only",
                        name = self.name,
                        loaded = meta.loaded
                    );
                    None
                }
            };
            (result, pending)
        };

        if let Some((key, snapshot)) = pending {
            let encoded = serde_json::to_value(&snapshot)
                .map_err(|err| AppError::write_failed(&key, err))?;
            if let Err(err) = self.store.set(&key, &encoded).await {
                warn!(
                    target: "fireledger",
                    event = "cell_write_failed",
                    key = %key,
                    error = %err
                );
                return Err(AppError::write_failed(&key, err));
            }
        }
        Ok(result)
    }

    fn lock_meta(&self) -> std::sync::MutexGuard<'_, CellMeta> {
        self.meta.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Object-safe view used to rebind cells of different value types together.
pub trait BoundCell: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_loaded(&self) -> bool;
    fn rebind<'a>(&'a self, namespace: &'a Namespace) -> BoxFuture<'a, LoadOutcome>;
}

impl<T> BoundCell for PersistentCell<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_loaded(&self) -> bool {
        PersistentCell::is_loaded(self)
    }

    fn rebind<'a>(&'a self, namespace: &'a Namespace) -> BoxFuture<'a, LoadOutcome> {
        Box::pin(self.bind(namespace))
    }
}
