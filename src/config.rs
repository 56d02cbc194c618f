use std::env;
use std::path::PathBuf;

const DB_FILE_NAME: &str = "fireledger.sqlite3";
const APP_DIR_NAME: &str = "fireledger";
const DEFAULT_MAX_CONNECTIONS: u32 = 4;
const HARD_MAX_CONNECTIONS: u32 = 16;
const DEFAULT_LOG_FILTER: &str = "fireledger=info";
const DEFAULT_DEMO_IDENTITY: &str = "demo";

/// Where the embedded database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: DbLocation,
    pub max_connections: u32,
    /// Identities that receive the demonstration dataset on first load.
    pub demo_identities: Vec<String>,
    pub log_filter: String,
    pub log_dir: Option<PathBuf>,
}

impl StoreConfig {
    /// Build the configuration from `FIRELEDGER_*` environment variables,
    /// falling back to defaults for anything missing or unparsable.
    pub fn load() -> Self {
        let location = env::var("FIRELEDGER_DB_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(|value| {
                if value == ":memory:" {
                    DbLocation::Memory
                } else {
                    DbLocation::File(PathBuf::from(value))
                }
            })
            .unwrap_or_else(|| DbLocation::File(default_db_path()));

        let max_connections = env::var("FIRELEDGER_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(HARD_MAX_CONNECTIONS))
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let demo_identities = env::var("FIRELEDGER_DEMO_IDENTITIES")
            .ok()
            .map(|value| parse_identity_list(&value))
            .unwrap_or_else(|| vec![DEFAULT_DEMO_IDENTITY.to_string()]);

        let log_filter = env::var("FIRELEDGER_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_dir = env::var("FIRELEDGER_LOG_DIR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Self {
            location,
            max_connections,
            demo_identities,
            log_filter,
            log_dir,
        }
    }

    pub fn in_memory() -> Self {
        Self {
            location: DbLocation::Memory,
            max_connections: 1,
            demo_identities: vec![DEFAULT_DEMO_IDENTITY.to_string()],
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.location = DbLocation::File(path.into());
        self
    }

    pub fn with_demo_identities<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.demo_identities = identities.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::load()
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join(APP_DIR_NAME)
        .join(DB_FILE_NAME)
}

fn parse_identity_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_list_trims_and_drops_empty_tokens() {
        assert_eq!(
            parse_identity_list(" demo, ,tester ,"),
            vec!["demo".to_string(), "tester".to_string()]
        );
        assert!(parse_identity_list("").is_empty());
    }

    #[test]
    fn in_memory_uses_single_connection() {
        let config = StoreConfig::in_memory();
        assert_eq!(config.location, DbLocation::Memory);
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.demo_identities, vec!["demo".to_string()]);
    }

    #[test]
    fn default_path_ends_with_db_file() {
        let path = default_db_path();
        assert!(path.ends_with(PathBuf::from(APP_DIR_NAME).join(DB_FILE_NAME)));
    }

    #[test]
    fn builders_override_fields() {
        let config = StoreConfig::in_memory()
            .with_db_path("/tmp/x.sqlite3")
            .with_demo_identities(["a", "b"]);
        assert_eq!(
            config.location,
            DbLocation::File(PathBuf::from("/tmp/x.sqlite3"))
        );
        assert_eq!(config.demo_identities, vec!["a".to_string(), "b".to_string()]);
    }
}
