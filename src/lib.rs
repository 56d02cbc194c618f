pub mod backup;
pub mod cell;
pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod id;
pub mod kv;
pub mod logging;
pub mod migrate;
pub mod namespace;
pub mod session;
pub mod time;

pub use backup::{BackupReport, BackupSentinel, IdentityState, DATASET_NAMES};
pub use cell::{BoundCell, LoadOutcome, PersistentCell};
pub use config::{DbLocation, StoreConfig};
pub use dataset::{CascadeReport, DatasetManager, SeedOutcome};
pub use error::{AppError, AppResult};
pub use kv::{KeyValueStore, MemoryStore, SqliteStore, StoreHandle};
pub use namespace::{Namespace, GUEST_NAMESPACE};
pub use session::{IdentityTransition, Session};
