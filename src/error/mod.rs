use std::collections::HashMap;
use std::fmt;
use std::io::Error as IoError;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::error::Category;
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;

/// The embedded database could not be opened (blocked, corrupted, quota, disabled).
pub const STORAGE_UNAVAILABLE: &str = "STORAGE/UNAVAILABLE";
/// A value was changed in memory but could not be written back.
pub const STORAGE_WRITE_FAILED: &str = "STORAGE/WRITE_FAILED";
/// A stored value exists but does not decode; it is never overwritten.
pub const STORAGE_UNDECODABLE: &str = "STORAGE/UNDECODABLE";
/// A schema upgrade failed and was rolled back.
pub const MIGRATION_FAILED: &str = "MIGRATION/FAILED";
/// The referenced entity does not exist in its collection.
pub const DATASET_NOT_FOUND: &str = "DATASET/NOT_FOUND";
/// The entity exists but is not in a state that allows the operation.
pub const DATASET_INVALID_STATE: &str = "DATASET/INVALID_STATE";
/// A snapshot field is present but has the wrong shape.
pub const SNAPSHOT_INVALID: &str = "SNAPSHOT/INVALID";
/// A required top-level snapshot field is absent.
pub const SNAPSHOT_MISSING_FIELD: &str = "SNAPSHOT/MISSING_FIELD";
/// Some keys of a backup or restore fan-out failed.
pub const BACKUP_PARTIAL: &str = "BACKUP/PARTIAL";

/// Error surfaced by every fallible operation in the crate.
///
/// `code` is stable and machine-matched (`STORAGE/WRITE_FAILED`); `message`
/// is safe to show to a person. `context` carries identifiers such as the
/// key or collection involved, and `cause` keeps the underlying failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code for foreign errors with nothing more specific to say.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code for errors built from a bare message.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn storage_unavailable(cause: impl Into<AppError>) -> Self {
        Self::new(STORAGE_UNAVAILABLE, "Local storage is unavailable.").with_cause(cause)
    }

    pub fn write_failed(key: &str, cause: impl Into<AppError>) -> Self {
        Self::new(STORAGE_WRITE_FAILED, "Changes may not be saved.")
            .with_context("key", key)
            .with_cause(cause)
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::new(DATASET_NOT_FOUND, format!("No entry in {collection} with that id"))
            .with_contexts([("collection", collection), ("id", id)])
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_contexts([(key, value)])
    }

    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.context.insert(key.into(), value.into());
        }
        self
    }

    /// Replace the cause. The previous cause, if any, is dropped.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Emit the error as a structured `tracing` record under the given event name.
    pub fn log_with_event(&self, event: &'static str) {
        tracing::error!(
            target: "fireledger",
            event,
            code = %self.code,
            message = %self.message,
            context = ?self.context,
            cause = ?self.cause.as_deref().map(|c| c.to_string()),
        );
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            write!(f, " {:?}", self.context)?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

/// Each link of the chain becomes one nested cause. An `AppError` found in
/// the chain is kept as-is, with its own causes.
impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        let mut links = Vec::new();
        for link in error.chain() {
            if let Some(app) = link.downcast_ref::<AppError>() {
                links.push(app.clone());
                break;
            }
            links.push(AppError::new(AppError::UNKNOWN_CODE, link.to_string()));
        }
        links
            .into_iter()
            .rev()
            .reduce(|cause, outer| outer.with_cause(cause))
            .unwrap_or_else(|| AppError::new(AppError::UNKNOWN_CODE, error.to_string()))
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let app = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app.with_context("os_code", os_code.to_string()),
            None => app,
        }
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = match error.classify() {
            Category::Io => "JSON/IO",
            Category::Syntax => "JSON/SYNTAX",
            Category::Data => "JSON/DATA",
            Category::Eof => "JSON/EOF",
        };
        let position = [("line", error.line()), ("column", error.column())]
            .into_iter()
            .filter(|(_, at)| *at > 0)
            .map(|(name, at)| (name, at.to_string()));
        AppError::new(code, error.to_string()).with_contexts(position)
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        let code = match &error {
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map_or_else(|| "SQLX/DATABASE".to_string(), |c| format!("Sqlite/{c}"));
                let app = AppError::new(code, db.message());
                return match db.constraint() {
                    Some(constraint) => app.with_context("constraint", constraint),
                    None => app,
                };
            }
            SqlxError::Io(_) => "SQLX/IO",
            SqlxError::RowNotFound => "SQLX/ROW_NOT_FOUND",
            SqlxError::PoolTimedOut => "SQLX/POOL_TIMEOUT",
            SqlxError::PoolClosed => "SQLX/POOL_CLOSED",
            SqlxError::ColumnDecode { .. } | SqlxError::Decode(_) => "SQLX/DECODE",
            _ => "SQLX/ERROR",
        };
        AppError::new(code, error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn not_found_names_collection_and_id() {
        let err = AppError::not_found("clients", "cli-1").with_cause(AppError::from("gone"));
        assert_eq!(err.code(), DATASET_NOT_FOUND);
        assert_eq!(err.context().len(), 2);
        assert_eq!(err.context()["collection"], "clients");
        assert_eq!(err.context()["id"], "cli-1");
        assert_eq!(err.cause().map(AppError::code), Some(AppError::GENERIC_CODE));
    }

    #[test]
    fn anyhow_chain_becomes_nested_causes() {
        let err = Err::<(), _>(std::io::Error::other("disk full"))
            .context("open database")
            .unwrap_err();

        let app = AppError::from(err);
        assert_eq!(app.code(), AppError::UNKNOWN_CODE);
        assert_eq!(app.message(), "open database");
        assert_eq!(app.cause().map(AppError::message), Some("disk full"));
    }

    #[test]
    fn app_error_inside_anyhow_survives_intact() {
        let inner = AppError::write_failed("u1-theme", AppError::from("locked"));
        let err = AnyhowError::from(inner.clone()).context("save theme");

        let app = AppError::from(err);
        assert_eq!(app.message(), "save theme");
        assert_eq!(app.cause(), Some(&inner));
    }

    #[test]
    fn storage_helpers_carry_codes_and_context() {
        let err = AppError::write_failed("u1-clients", AppError::from("disk"));
        assert_eq!(err.code(), STORAGE_WRITE_FAILED);
        assert_eq!(err.context().get("key"), Some(&"u1-clients".to_string()));
        assert_eq!(err.cause().map(AppError::message), Some("disk"));

        let err = AppError::storage_unavailable(AppError::from("locked"));
        assert_eq!(err.code(), STORAGE_UNAVAILABLE);
    }

    #[test]
    fn json_syntax_error_records_position() {
        let err = serde_json::from_str::<serde_json::Value>("[1,").unwrap_err();
        let app = AppError::from(err);
        assert_eq!(app.code(), "JSON/EOF");
        assert_eq!(app.context().get("line").map(String::as_str), Some("1"));

        let err = serde_json::from_str::<serde_json::Value>("{\"a\": }").unwrap_err();
        assert_eq!(AppError::from(err).code(), "JSON/SYNTAX");
    }

    #[test]
    fn sqlx_errors_map_to_sqlx_codes() {
        assert_eq!(AppError::from(SqlxError::PoolClosed).code(), "SQLX/POOL_CLOSED");
        assert_eq!(AppError::from(SqlxError::RowNotFound).code(), "SQLX/ROW_NOT_FOUND");
    }

    #[test]
    fn display_includes_code_and_context() {
        let rendered = AppError::not_found("clients", "cli-1").to_string();
        assert!(rendered.starts_with("[DATASET/NOT_FOUND] No entry in clients"));
        assert!(rendered.contains("cli-1"));
    }

    #[test]
    fn serializes_without_empty_fields() {
        let value = serde_json::to_value(AppError::new(SNAPSHOT_INVALID, "bad")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "code": SNAPSHOT_INVALID, "message": "bad" })
        );

        let nested = AppError::storage_unavailable(AppError::from("locked"));
        let value = serde_json::to_value(&nested).unwrap();
        assert_eq!(value["cause"]["message"], "locked");
    }
}
