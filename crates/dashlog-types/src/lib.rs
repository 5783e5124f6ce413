//! Shared types for dashlog
//!
//! This crate contains the log entry model, filter and search shapes, and
//! buffer statistics used across the dashlog crates and by the dashboard's
//! log viewer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form key/value payload attached to an entry
pub type Metadata = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Levels and sources
// ============================================================================

/// Log severity level
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Every level, in ascending severity
    pub const ALL: [LogLevel; 4] = [Self::Debug, Self::Info, Self::Warning, Self::Error];

    /// Parse a level label, falling back to `Info` for anything unrecognised
    pub fn from_label(s: &str) -> Self {
        Self::recognize(s).unwrap_or(Self::Info)
    }

    /// Parse a level label, returning `None` for unrecognised words
    pub fn recognize(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" | "trace" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" | "err" | "critical" | "fatal" => Some(Self::Error),
            _ => None,
        }
    }

    /// Upper-case label as written in log files
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel a log line arrived on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    #[default]
    Stdout,
    Stderr,
    /// Generated by the dashboard itself
    System,
}

impl LogSource {
    /// Parse a source label; unknown labels are treated as `System`
    pub fn from_label(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "stdout" => Self::Stdout,
            "stderr" => Self::Stderr,
            _ => Self::System,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::System => "system",
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// A single parsed log record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLogEntry {
    /// Unique id (ingestion millis + counter)
    pub id: String,

    /// Parsed timestamp, or wall-clock time of ingestion
    pub timestamp: DateTime<Utc>,

    pub level: LogLevel,

    /// Message with any timestamp/level/component prefix stripped
    pub message: String,

    pub source: LogSource,

    /// Correlates the entry with a long-running job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    /// Original, unmodified input line
    pub raw_line: String,
}

impl ParsedLogEntry {
    /// Component name or an empty string
    pub fn component_str(&self) -> &str {
        self.component.as_deref().unwrap_or("")
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Filter over buffered entries
///
/// Every populated field is an independent predicate and all of them must
/// hold. `level` takes precedence over `levels` when both are set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogFilter {
    /// Exact level match
    pub level: Option<LogLevel>,

    /// Any-of level match (empty = inactive)
    pub levels: Vec<LogLevel>,

    pub component: Option<String>,

    pub operation_id: Option<String>,

    /// Inclusive lower time bound
    pub start_time: Option<DateTime<Utc>>,

    /// Inclusive upper time bound
    pub end_time: Option<DateTime<Utc>>,

    /// Case-insensitive substring over message and component
    pub search: Option<String>,

    /// Regular expression over message and component
    pub pattern: Option<String>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_levels(mut self, levels: impl IntoIterator<Item = LogLevel>) -> Self {
        self.levels = levels.into_iter().collect();
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_time_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Check if no predicate is active
    pub fn is_empty(&self) -> bool {
        self.level.is_none()
            && self.levels.is_empty()
            && self.component.is_none()
            && self.operation_id.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
            && self.search.is_none()
            && self.pattern.is_none()
    }
}

/// Default cap on search results
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// Options for a bounded search over buffered entries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub case_sensitive: bool,

    /// Also search the JSON-encoded metadata
    pub include_metadata: bool,

    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            include_metadata: false,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl SearchOptions {
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn including_metadata(mut self) -> Self {
        self.include_metadata = true;
        self
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counts per log level
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct LevelCounts {
    pub debug: usize,
    pub info: usize,
    pub warning: usize,
    pub error: usize,
}

impl LevelCounts {
    pub fn increment(&mut self, level: LogLevel) {
        match level {
            LogLevel::Debug => self.debug += 1,
            LogLevel::Info => self.info += 1,
            LogLevel::Warning => self.warning += 1,
            LogLevel::Error => self.error += 1,
        }
    }

    pub fn get(&self, level: LogLevel) -> usize {
        match level {
            LogLevel::Debug => self.debug,
            LogLevel::Info => self.info,
            LogLevel::Warning => self.warning,
            LogLevel::Error => self.error,
        }
    }

    pub fn total(&self) -> usize {
        self.debug + self.info + self.warning + self.error
    }
}

/// Aggregates over the current buffer contents
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub total_entries: usize,
    pub capacity: usize,
    pub by_level: LevelCounts,
    pub by_component: BTreeMap<String, usize>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}
