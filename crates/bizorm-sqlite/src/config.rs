//! SQLite connection configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Where and how connections are opened.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file; `None` for a private in-memory database.
    pub path: Option<PathBuf>,
    /// How long a statement waits on a locked database before failing
    /// with a serialization error.
    pub busy_timeout: Duration,
    /// Enforce `REFERENCES` clauses (`PRAGMA foreign_keys`).
    pub foreign_keys: bool,
    /// `PRAGMA journal_mode` applied to file databases, e.g. `WAL`.
    pub journal_mode: Option<String>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
            foreign_keys: true,
            journal_mode: None,
        }
    }
}

impl SqliteConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    #[must_use]
    pub fn journal_mode(mut self, mode: impl Into<String>) -> Self {
        self.journal_mode = Some(mode.into());
        self
    }

    pub fn is_memory(&self) -> bool {
        self.path.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = SqliteConfig::file("/tmp/db.sqlite")
            .busy_timeout(Duration::from_millis(250))
            .journal_mode("WAL");
        assert!(!config.is_memory());
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.journal_mode.as_deref(), Some("WAL"));
        assert!(config.foreign_keys);
        assert!(SqliteConfig::memory().is_memory());
    }
}
