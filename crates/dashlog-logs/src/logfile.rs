//! On-disk log file format
//!
//! The dashboard persists logs to one JSON document per calendar month,
//! `logs-YYYY-MM.json`, shaped as `{ "logs": [ ... ] }`. Records are kept in
//! append order: oldest first, newest last.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use dashlog_types::{LogLevel, LogSource, Metadata, ParsedLogEntry};

use crate::error::StreamError;

/// Prefix shared by every monthly log file
pub const LOG_FILE_PREFIX: &str = "logs-";

/// A persisted log file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LogFile {
    pub logs: Vec<LogRecord>,
}

/// One persisted log record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    #[serde(default)]
    pub id: String,

    /// ISO-8601 datetime
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub level: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl LogRecord {
    /// Convert into a buffered entry
    ///
    /// Unknown levels become INFO, a missing source becomes `system`, and an
    /// unparseable timestamp falls back to the current time.
    pub fn to_entry(&self) -> ParsedLogEntry {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        ParsedLogEntry {
            id: self.id.clone(),
            timestamp,
            level: LogLevel::from_label(&self.level),
            message: self.message.clone(),
            source: self
                .source
                .as_deref()
                .map_or(LogSource::System, LogSource::from_label),
            operation_id: self.operation_id.clone(),
            component: self.component.clone(),
            metadata: self.metadata.clone(),
            raw_line: serde_json::to_string(self).unwrap_or_default(),
        }
    }

    pub fn from_entry(entry: &ParsedLogEntry) -> Self {
        Self {
            id: entry.id.clone(),
            timestamp: entry.timestamp.to_rfc3339(),
            level: entry.level.as_str().to_string(),
            message: entry.message.clone(),
            source: Some(entry.source.as_str().to_string()),
            operation_id: entry.operation_id.clone(),
            component: entry.component.clone(),
            metadata: entry.metadata.clone(),
        }
    }
}

/// File name for the month containing `date`
pub fn log_file_name(date: DateTime<Utc>) -> String {
    format!("{}{:04}-{:02}.json", LOG_FILE_PREFIX, date.year(), date.month())
}

/// Path of the current month's log file under `dir`
pub fn current_log_path(dir: &Path) -> PathBuf {
    dir.join(log_file_name(Utc::now()))
}

/// Check if a file name looks like a monthly log file
pub fn is_log_file_name(name: &str) -> bool {
    name.starts_with(LOG_FILE_PREFIX) && name.ends_with(".json")
}

/// Check if a path points at a monthly log file
pub fn is_log_file_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_log_file_name)
}

/// Read and parse a log file
pub async fn read_log_file(path: &Path) -> Result<LogFile, StreamError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| StreamError::io(path, e))?;
    parse_log_file(path, &content)
}

pub(crate) fn parse_log_file(path: &Path, content: &[u8]) -> Result<LogFile, StreamError> {
    serde_json::from_slice(content).map_err(|source| StreamError::Json {
        path: path.to_path_buf(),
        source,
    })
}
