use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StreamError;
use crate::logfile::{LogFile, LogRecord, current_log_path, parse_log_file};

/// Appends records to the current month's log file
///
/// Records are always appended at the end so readers can resume after the
/// last record they saw.
#[derive(Clone, Debug)]
pub struct LogFileWriter {
    log_dir: PathBuf,

    /// Oldest records beyond this are dropped on write
    max_entries: Option<usize>,
}

impl LogFileWriter {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            max_entries: None,
        }
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub async fn append(&self, record: LogRecord) -> Result<PathBuf, StreamError> {
        self.append_all(vec![record]).await
    }

    /// Append records in order, returning the file written
    pub async fn append_all(&self, records: Vec<LogRecord>) -> Result<PathBuf, StreamError> {
        tokio::fs::create_dir_all(&self.log_dir)
            .await
            .map_err(|source| StreamError::CreateDir {
                path: self.log_dir.clone(),
                source,
            })?;

        let path = current_log_path(&self.log_dir);
        let mut file = match tokio::fs::read(&path).await {
            Ok(content) if content.iter().all(u8::is_ascii_whitespace) => LogFile::default(),
            Ok(content) => parse_log_file(&path, &content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => LogFile::default(),
            Err(e) => return Err(StreamError::io(&path, e)),
        };

        let added = records.len();
        file.logs.extend(records);

        if let Some(max) = self.max_entries {
            let excess = file.logs.len().saturating_sub(max);
            file.logs.drain(..excess);
        }

        let json = serde_json::to_vec_pretty(&file).map_err(|source| StreamError::Json {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StreamError::io(&path, e))?;

        debug!(path = %path.display(), added, total = file.logs.len(), "appended log records");
        Ok(path)
    }
}
