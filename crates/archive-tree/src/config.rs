use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for the SQLite-backed resource store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a connection waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    pub journal_mode: String,
    pub synchronous: String,
    /// Extra SQL applied after the schema every time the store is opened.
    pub migrations: Option<String>,
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn with_migrations(mut self, sql: impl Into<String>) -> Self {
        self.migrations = Some(sql.into());
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 10_000,
            journal_mode: "WAL".into(),
            synchronous: "NORMAL".into(),
            migrations: None,
        }
    }
}
