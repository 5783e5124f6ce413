use std::path::PathBuf;

use thiserror::Error;

/// Errors from buffer queries
#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors from the streaming service and its file handling
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Query(#[from] LogError),
}

impl StreamError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
