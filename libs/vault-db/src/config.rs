//! Connection configuration for the embedded store.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default `busy_timeout` applied to file-backed databases.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    Wal,
    Delete,
    Truncate,
    Memory,
}

impl JournalMode {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Settings used by [`crate::Db::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// `sqlite://path/to/vault.db` or `sqlite::memory:`.
    pub dsn: String,
    pub max_connections: u32,
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,
    /// When unset: WAL for files, DELETE for in-memory databases.
    pub journal_mode: Option<JournalMode>,
    /// Create missing parent directories for file-backed databases.
    pub create_dirs: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: "sqlite://vault.db".to_owned(),
            max_connections: 4,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            journal_mode: None,
            create_dirs: true,
        }
    }
}

impl DbConfig {
    /// Config for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            dsn: "sqlite::memory:".to_owned(),
            max_connections: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        is_memory_dsn(&self.dsn)
    }

    pub(crate) fn effective_journal_mode(&self) -> JournalMode {
        match self.journal_mode {
            Some(mode) => mode,
            None if self.is_memory() => JournalMode::Delete,
            None => JournalMode::Wal,
        }
    }
}

pub(crate) fn is_memory_dsn(dsn: &str) -> bool {
    dsn == "sqlite::memory:"
        || dsn.starts_with("sqlite::memory:?")
        || dsn.contains("mode=memory")
        || dsn == "sqlite://:memory:"
}

/// Filesystem path of a `sqlite://` DSN, without query parameters.
pub(crate) fn sqlite_file_path(dsn: &str) -> Option<&str> {
    if is_memory_dsn(dsn) {
        return None;
    }
    let rest = dsn
        .strip_prefix("sqlite://")
        .or_else(|| dsn.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    (!path.is_empty()).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_dsn_defaults_to_delete_journal() {
        let cfg = DbConfig::in_memory();
        assert!(cfg.is_memory());
        assert_eq!(cfg.effective_journal_mode(), JournalMode::Delete);
        assert_eq!(DbConfig::default().effective_journal_mode(), JournalMode::Wal);
    }

    #[test]
    fn file_path_strips_scheme_and_query() {
        assert_eq!(sqlite_file_path("sqlite://data/vault.db?mode=rwc"), Some("data/vault.db"));
        assert_eq!(sqlite_file_path("sqlite:vault.db"), Some("vault.db"));
        assert_eq!(sqlite_file_path("sqlite::memory:"), None);
    }
}
