use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Default number of entries kept in memory
pub const DEFAULT_HISTORY_BUFFER_SIZE: usize = 1000;

/// Default polling period when native watching is unavailable
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Operational parameters for the streaming service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogStreamConfig {
    /// Directory holding the monthly `logs-YYYY-MM.json` files
    pub log_dir: PathBuf,

    /// Capacity of both the parser ring buffer and the mirrored history
    pub history_buffer_size: usize,

    pub poll_interval_ms: u64,

    /// Try OS-level file watching before falling back to polling
    pub use_file_watcher: bool,
}

impl Default for LogStreamConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            history_buffer_size: DEFAULT_HISTORY_BUFFER_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            use_file_watcher: true,
        }
    }
}

impl LogStreamConfig {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, StreamError> {
        Ok(toml::from_str(s)?)
    }

    /// Load from a TOML file
    pub async fn load(path: &Path) -> Result<Self, StreamError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StreamError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    /// Merge a partial update, returning whether the buffer size changed
    pub fn apply(&mut self, update: LogStreamConfigUpdate) -> bool {
        let old_size = self.history_buffer_size;

        if let Some(log_dir) = update.log_dir {
            self.log_dir = log_dir;
        }
        if let Some(size) = update.history_buffer_size {
            self.history_buffer_size = size;
        }
        if let Some(interval) = update.poll_interval_ms {
            self.poll_interval_ms = interval;
        }
        if let Some(use_watcher) = update.use_file_watcher {
            self.use_file_watcher = use_watcher;
        }

        self.history_buffer_size != old_size
    }
}

/// Partial config for live updates
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogStreamConfigUpdate {
    pub log_dir: Option<PathBuf>,
    pub history_buffer_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub use_file_watcher: Option<bool>,
}
