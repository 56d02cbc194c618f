//! Shadow copies of a namespace's datasets.
//!
//! A backup copies every live `{ns}-{name}` record to `{ns}-{name}_backup` and
//! then stamps `{ns}-lastBackupTimestamp`. A restore copies the shadows back.
//! Both work key by key: one key failing is logged and the rest continue.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::BACKUP_PARTIAL;
use crate::kv::StoreHandle;
use crate::namespace::{Namespace, LAST_BACKUP_NAME};
use crate::time::now_rfc3339;
use crate::{AppError, AppResult};

/// Every dataset record that is backed up and restored.
pub const DATASET_NAMES: &[&str] = &[
    "clients",
    "equipment",
    "clientEquipment",
    "inspections",
    "financial",
    "certificates",
    "licenses",
    "deliveries",
    "expenses",
    "recurringPayables",
    "companyProfile",
    "appSettings",
    "theme",
];

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BackupReport {
    /// Names whose value was copied.
    pub copied: Vec<String>,
    /// Names with nothing to copy.
    pub skipped: Vec<String>,
    /// Names whose read or write failed.
    pub failed: Vec<(String, AppError)>,
}

impl BackupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `BACKUP/PARTIAL` when any key failed.
    pub fn into_result(self) -> AppResult<Self> {
        match self.failed.first() {
            None => Ok(self),
            Some((name, first)) => Err(AppError::new(
                BACKUP_PARTIAL,
                "Some datasets could not be copied.",
            )
            .with_contexts([
                ("failed", self.failed.len().to_string()),
                ("first_failed", name.clone()),
            ])
            .with_cause(first.clone())),
        }
    }

    fn record(&mut self, name: &str, outcome: AppResult<bool>) {
        match outcome {
            Ok(true) => self.copied.push(name.to_string()),
            Ok(false) => self.skipped.push(name.to_string()),
            Err(err) => self.failed.push((name.to_string(), err)),
        }
    }
}

/// Copy `from` to `to` when `from` holds a value. `Ok(false)` when absent.
async fn copy_key(store: &StoreHandle, from: &str, to: &str) -> AppResult<bool> {
    let Some(value) = store.get(from).await? else {
        return Ok(false);
    };
    store.set(to, &value).await?;
    Ok(true)
}

async fn fan_out(
    store: &StoreHandle,
    namespace: &Namespace,
    direction: &'static str,
    keys: impl Fn(&str) -> (String, String),
) -> BackupReport {
    let outcomes = join_all(DATASET_NAMES.iter().map(|name| {
        let (from, to) = keys(name);
        async move {
            let outcome = copy_key(store, &from, &to).await;
            match &outcome {
                Ok(true) => debug!(
                    target: "fireledger",
                    event = "backup_key_copied",
                    direction,
                    from = %from,
                    to = %to
                ),
                Ok(false) => debug!(
                    target: "fireledger",
                    event = "backup_key_skipped",
                    direction,
                    from = %from
                ),
                Err(err) => warn!(
                    target: "fireledger",
                    event = "backup_key_failed",
                    direction,
                    namespace = %namespace,
                    from = %from,
                    error = %err
                ),
            }
            (*name, outcome)
        }
    }))
    .await;

    let mut report = BackupReport::default();
    for (name, outcome) in outcomes {
        report.record(name, outcome);
    }
    report
}

/// Copy every live dataset of `namespace` to its shadow key, then stamp the
/// backup time. The guest namespace is never backed up.
pub async fn backup_namespace(store: &StoreHandle, namespace: &Namespace) -> BackupReport {
    if namespace.is_guest() {
        debug!(target: "fireledger", event = "backup_skipped_guest");
        return BackupReport::default();
    }

    let mut report = fan_out(store, namespace, "backup", |name| {
        (namespace.key(name), namespace.backup_key(name))
    })
    .await;

    let stamp = Value::String(now_rfc3339());
    if let Err(err) = store.set(&namespace.last_backup_key(), &stamp).await {
        warn!(
            target: "fireledger",
            event = "backup_stamp_failed",
            namespace = %namespace,
            error = %err
        );
        report.failed.push((LAST_BACKUP_NAME.to_string(), err));
    }

    info!(
        target: "fireledger",
        event = "backup_complete",
        namespace = %namespace,
        copied = report.copied.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len()
    );
    report
}

/// Copy every shadow key of `namespace` back over its live key. Names with no
/// shadow are left alone.
pub async fn restore_namespace(store: &StoreHandle, namespace: &Namespace) -> BackupReport {
    if namespace.is_guest() {
        debug!(target: "fireledger", event = "restore_skipped_guest");
        return BackupReport::default();
    }

    let report = fan_out(store, namespace, "restore", |name| {
        (namespace.backup_key(name), namespace.key(name))
    })
    .await;

    info!(
        target: "fireledger",
        event = "restore_complete",
        namespace = %namespace,
        restored = report.copied.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len()
    );
    report
}

/// When `namespace` was last backed up, if ever.
pub async fn last_backup_at(
    store: &StoreHandle,
    namespace: &Namespace,
) -> AppResult<Option<DateTime<Utc>>> {
    let key = namespace.last_backup_key();
    let Some(value) = store.get(&key).await? else {
        return Ok(None);
    };
    let parsed = value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|stamp| stamp.with_timezone(&Utc));
    if parsed.is_none() {
        warn!(target: "fireledger", event = "backup_stamp_unreadable", key = %key);
    }
    Ok(parsed)
}

/// Where the sentinel believes identity currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityState {
    /// Nothing observed yet.
    Unresolved,
    NoIdentity,
    HasIdentity(String),
}

impl From<&Namespace> for IdentityState {
    fn from(namespace: &Namespace) -> Self {
        match namespace {
            Namespace::User(id) => IdentityState::HasIdentity(id.clone()),
            Namespace::Guest => IdentityState::NoIdentity,
        }
    }
}

impl IdentityState {
    /// The namespace to back up when moving from `self` to `next`.
    ///
    /// Only a logout (some identity to none) yields one. Startup resolution,
    /// logins and direct identity switches do not.
    pub fn backup_target(&self, next: &IdentityState) -> Option<Namespace> {
        match (self, next) {
            (IdentityState::HasIdentity(previous), IdentityState::NoIdentity) => {
                Some(Namespace::User(previous.clone()))
            }
            _ => None,
        }
    }
}

/// Watches identity transitions and backs up the outgoing identity on logout.
pub struct BackupSentinel {
    store: StoreHandle,
    state: Mutex<IdentityState>,
}

impl BackupSentinel {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            state: Mutex::new(IdentityState::Unresolved),
        }
    }

    pub fn state(&self) -> IdentityState {
        self.lock_state().clone()
    }

    /// Record the move to `namespace` and, if it is a logout, back up the
    /// previous identity before returning.
    pub async fn on_identity_changed(&self, namespace: &Namespace) -> Option<BackupReport> {
        let next = IdentityState::from(namespace);
        let target = {
            let mut state = self.lock_state();
            let target = state.backup_target(&next);
            let previous = state.clone();
            debug!(
                target: "fireledger",
                event = "identity_transition",
                from = ?previous,
                to = ?next,
                backup = target.is_some()
            );
            *state = next;
            target
        }?;
        Some(backup_namespace(&self.store, &target).await)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
