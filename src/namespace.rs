use std::fmt;

/// Key prefix used while nobody is signed in. Data under it is never persisted.
pub const GUEST_NAMESPACE: &str = "guest";
pub const INITIALIZED_NAME: &str = "initialized";
pub const LAST_BACKUP_NAME: &str = "lastBackupTimestamp";
pub const BACKUP_SUFFIX: &str = "_backup";

/// The key prefix isolating one identity's records from another's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    User(String),
    Guest,
}

impl Namespace {
    /// Derive the namespace from the current identity; no identity, a blank one,
    /// or one spelled like the sentinel maps to guest.
    pub fn resolve(identity: Option<&str>) -> Self {
        match identity.map(str::trim) {
            Some(id) if !id.is_empty() && id != GUEST_NAMESPACE => {
                Namespace::User(id.to_string())
            }
            _ => Namespace::Guest,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Namespace::User(id) => id,
            Namespace::Guest => GUEST_NAMESPACE,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Namespace::Guest)
    }

    pub fn key(&self, name: &str) -> String {
        format!("{}-{name}", self.as_str())
    }

    pub fn backup_key(&self, name: &str) -> String {
        format!("{}-{name}{BACKUP_SUFFIX}", self.as_str())
    }

    pub fn initialized_key(&self) -> String {
        self.key(INITIALIZED_NAME)
    }

    pub fn last_backup_key(&self) -> String {
        self.key(LAST_BACKUP_NAME)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_maps_missing_or_blank_identity_to_guest() {
        assert_eq!(Namespace::resolve(None), Namespace::Guest);
        assert_eq!(Namespace::resolve(Some("")), Namespace::Guest);
        assert_eq!(Namespace::resolve(Some("   ")), Namespace::Guest);
        assert_eq!(Namespace::resolve(Some("guest")), Namespace::Guest);
        assert_eq!(
            Namespace::resolve(Some("u1")),
            Namespace::User("u1".to_string())
        );
    }

    #[test]
    fn keys_follow_namespace_dash_name_layout() {
        let ns = Namespace::resolve(Some("u1"));
        assert_eq!(ns.key("clients"), "u1-clients");
        assert_eq!(ns.backup_key("clients"), "u1-clients_backup");
        assert_eq!(ns.initialized_key(), "u1-initialized");
        assert_eq!(ns.last_backup_key(), "u1-lastBackupTimestamp");
        assert_eq!(Namespace::Guest.key("theme"), "guest-theme");
    }

    #[test]
    fn guest_prefixed_identity_is_a_user() {
        let ns = Namespace::resolve(Some("guest-ops"));
        assert_eq!(ns, Namespace::User("guest-ops".to_string()));
        assert!(!ns.is_guest());
        assert_eq!(ns.key("clients"), "guest-ops-clients");
    }
}
