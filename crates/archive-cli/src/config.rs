use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use archive_tree::StoreConfig;
use archive_types::CancelToken;
use serde::{Deserialize, Serialize};

/// File name looked up inside the data directory.
pub const CONFIG_FILE: &str = "archive.toml";

/// On-disk configuration of an archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub data_dir: PathBuf,
    /// Database file name, relative to `data_dir`.
    pub database: String,
    /// Blob directory name, relative to `data_dir`.
    pub blob_dir: String,
    /// Deadline applied to every command's store operations.
    pub operation_timeout_ms: Option<u64>,
    /// SQL file run after the schema whenever the database is opened.
    pub migration_file: Option<PathBuf>,
    pub store: StoreConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            database: "state.db".into(),
            blob_dir: "blobs".into(),
            operation_timeout_ms: None,
            migration_file: None,
            store: StoreConfig::default(),
        }
    }
}

impl ArchiveConfig {
    /// Load configuration.
    ///
    /// An explicit `file` must exist. Otherwise `<data_dir>/archive.toml` is
    /// used when present and defaults apply when it is not. A `data_dir`
    /// given on the command line overrides the file.
    pub fn load(file: Option<&Path>, data_dir: Option<&Path>) -> anyhow::Result<Self> {
        let implicit = data_dir
            .unwrap_or_else(|| Path::new("."))
            .join(CONFIG_FILE);
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None if implicit.is_file() => Self::from_file(&implicit)?,
            None => Self::default(),
        };
        if let Some(dir) = data_dir {
            config.data_dir = dir.to_path_buf();
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database)
    }

    pub fn blob_path(&self) -> PathBuf {
        self.data_dir.join(&self.blob_dir)
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE)
    }

    /// Store settings with the migration file, if any, read in. A relative
    /// migration path is taken from `data_dir`.
    pub fn store_config(&self) -> anyhow::Result<StoreConfig> {
        let mut store = self.store.clone();
        if let Some(file) = &self.migration_file {
            let path = self.data_dir.join(file);
            let sql = fs::read_to_string(&path)
                .with_context(|| format!("reading migrations {}", path.display()))?;
            store = store.with_migrations(sql);
        }
        Ok(store)
    }

    /// A fresh token carrying the configured deadline.
    pub fn cancel_token(&self) -> CancelToken {
        match self.operation_timeout_ms {
            Some(ms) => CancelToken::with_timeout(Duration::from_millis(ms)),
            None => CancelToken::new(),
        }
    }
}
