use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::backup::{BackupReport, BackupSentinel, IdentityState};
use crate::config::StoreConfig;
use crate::dataset::seed::{DemoSeed, SeedProvider};
use crate::dataset::{DatasetManager, SeedOutcome};
use crate::kv::StoreHandle;
use crate::namespace::Namespace;
use crate::AppResult;

/// Result of one identity transition.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityTransition {
    pub namespace: Namespace,
    /// Present when the transition was a logout.
    pub backup: Option<BackupReport>,
    pub seed: SeedOutcome,
}

/// Owns the current identity and drives the backup sentinel and the dataset
/// namespace from it. Identity is passed in explicitly; nothing here reads
/// global state.
pub struct Session {
    store: StoreHandle,
    sentinel: BackupSentinel,
    datasets: DatasetManager,
    identity: watch::Sender<Option<String>>,
    transition_lock: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(store: StoreHandle, seed: Arc<dyn SeedProvider>) -> Self {
        let (identity, _) = watch::channel(None);
        Self {
            sentinel: BackupSentinel::new(store.clone()),
            datasets: DatasetManager::new(store.clone(), seed),
            store,
            identity,
            transition_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// SQLite-backed session seeding the configured demo identities.
    pub fn open(config: &StoreConfig) -> Self {
        Self::new(
            StoreHandle::sqlite(config),
            Arc::new(DemoSeed::new(config.demo_identities.iter().cloned())),
        )
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn datasets(&self) -> &DatasetManager {
        &self.datasets
    }

    pub fn sentinel(&self) -> &BackupSentinel {
        &self.sentinel
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.borrow().clone()
    }

    pub fn subscribe_identity(&self) -> watch::Receiver<Option<String>> {
        self.identity.subscribe()
    }

    /// Move to `identity` (`None` = signed out).
    ///
    /// The sentinel sees the transition first so a logout backs up the
    /// outgoing identity while its records are still current; then every
    /// dataset cell is rebound and seeded; then the identity is published.
    /// Returns `None` when the identity is unchanged.
    pub async fn set_identity(
        &self,
        identity: Option<String>,
    ) -> AppResult<Option<IdentityTransition>> {
        let _transition = self.transition_lock.lock().await;

        let namespace = Namespace::resolve(identity.as_deref());
        let next = IdentityState::from(&namespace);
        let current = self.sentinel.state();
        if current != IdentityState::Unresolved && current == next {
            return Ok(None);
        }
        let identity = match &namespace {
            Namespace::User(id) => Some(id.clone()),
            Namespace::Guest => None,
        };
        info!(
            target: "fireledger",
            event = "session_identity_changed",
            namespace = %namespace
        );

        let backup = self.sentinel.on_identity_changed(&namespace).await;
        let seeded = self.datasets.switch_namespace(namespace.clone()).await;
        self.identity.send_replace(identity);

        Ok(Some(IdentityTransition {
            namespace,
            backup,
            seed: seeded?,
        }))
    }

    /// Apply every identity published on `identities` until its sender is
    /// dropped. Failed transitions are logged and following continues.
    pub async fn follow(&self, mut identities: watch::Receiver<Option<String>>) {
        loop {
            let next = identities.borrow_and_update().clone();
            if let Err(err) = self.set_identity(next).await {
                err.log_with_event("session_transition_failed");
            }
            if identities.changed().await.is_err() {
                break;
            }
        }
    }
}
