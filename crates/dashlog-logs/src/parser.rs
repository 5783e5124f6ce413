use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::sync::broadcast;

use dashlog_types::{
    BufferStats, LevelCounts, LogFilter, LogLevel, LogSource, ParsedLogEntry, SearchOptions,
};

use crate::buffer::RingBuffer;
use crate::config::DEFAULT_HISTORY_BUFFER_SIZE;
use crate::error::LogError;
use crate::events::{EventBus, LogEvent};
use crate::filter::{CompiledFilter, SearchPattern, Searcher};

/// `[2024-06-17 14:30:25] INFO: Collections: Processing`
static BRACKETED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})\] (\w+): ([^:]+): (.*)$")
        .expect("bracketed pattern is valid")
});

/// `INFO: Processing`
static LEVEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)(debug|trace|info|warning|warn|error|critical|fatal): ?(.*)$")
        .expect("level prefix pattern is valid")
});

/// `2024-06-17 14:30:25,123 INFO Processing`
static MILLIS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d{3}) (?i)(debug|trace|info|warning|warn|error|critical|fatal) (.*)$",
    )
    .expect("millisecond pattern is valid")
});

/// `2024-06-17 14:30:25 Processing`, optionally with fraction and offset
static TIMESTAMP_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?) (.*)$",
    )
    .expect("timestamp pattern is valid")
});

/// Structured fields pulled out of a raw line
struct LineParts<'a> {
    timestamp: Option<&'a str>,
    level: LogLevel,
    component: Option<&'a str>,
    message: &'a str,
}

/// Parses raw lines into entries and keeps the most recent ones in a ring
///
/// Cloning is cheap and yields a handle onto the same buffer.
#[derive(Clone)]
pub struct LogParser {
    buffer: Arc<RwLock<RingBuffer<ParsedLogEntry>>>,

    /// Per-parser counter for entry ids
    next_id: Arc<AtomicU64>,

    events: EventBus,
}

impl LogParser {
    /// Create a parser with its own event bus
    pub fn new(capacity: usize) -> Self {
        Self::with_events(capacity, EventBus::default())
    }

    /// Create a parser that publishes onto an existing bus
    pub fn with_events(capacity: usize, events: EventBus) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(RingBuffer::new(capacity))),
            next_id: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Parse a raw line without buffering it
    ///
    /// Never fails: unrecognised lines become INFO entries (ERROR on stderr)
    /// stamped with the current time.
    pub fn parse_line(
        &self,
        raw: &str,
        source: LogSource,
        operation_id: Option<&str>,
    ) -> ParsedLogEntry {
        let parts = Self::split_line(raw);

        let mut level = parts.level;
        if source == LogSource::Stderr && level == LogLevel::Info {
            level = LogLevel::Error;
        }

        let timestamp = parts
            .timestamp
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);

        ParsedLogEntry {
            id: self.generate_id(),
            timestamp,
            level,
            message: parts.message.trim_end().to_string(),
            source,
            operation_id: operation_id.map(str::to_string),
            component: parts.component.map(|c| c.trim().to_string()),
            metadata: None,
            raw_line: raw.to_string(),
        }
    }

    /// Try each line pattern in order, falling back to level inference
    fn split_line(raw: &str) -> LineParts<'_> {
        let line = raw.trim();

        if let Some(caps) = BRACKETED.captures(line) {
            return LineParts {
                timestamp: caps.get(1).map(|m| m.as_str()),
                level: LogLevel::from_label(&caps[2]),
                component: caps.get(3).map(|m| m.as_str()),
                message: caps.get(4).map_or("", |m| m.as_str()),
            };
        }

        if let Some(caps) = LEVEL_PREFIX.captures(line) {
            return LineParts {
                timestamp: None,
                level: LogLevel::from_label(&caps[1]),
                component: None,
                message: caps.get(2).map_or("", |m| m.as_str()),
            };
        }

        if let Some(caps) = MILLIS.captures(line) {
            return LineParts {
                timestamp: caps.get(1).map(|m| m.as_str()),
                level: LogLevel::from_label(&caps[2]),
                component: None,
                message: caps.get(3).map_or("", |m| m.as_str()),
            };
        }

        if let Some(caps) = TIMESTAMP_ONLY.captures(line) {
            let message = caps.get(2).map_or("", |m| m.as_str());
            return LineParts {
                timestamp: caps.get(1).map(|m| m.as_str()),
                level: infer_level(message),
                component: None,
                message,
            };
        }

        LineParts {
            timestamp: None,
            level: infer_level(line),
            component: None,
            message: line,
        }
    }

    fn generate_id(&self) -> String {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", Utc::now().timestamp_millis(), seq)
    }

    /// Add an entry, evicting the oldest once the buffer is full
    pub fn add_log_entry(&self, entry: ParsedLogEntry) {
        self.buffer.write().push(entry.clone());

        let level = entry.level;
        self.events.emit(LogEvent::LogEntry(entry.clone()));
        match level {
            LogLevel::Error => self.events.emit(LogEvent::Error(entry)),
            LogLevel::Warning => self.events.emit(LogEvent::Warning(entry)),
            _ => {}
        }
    }

    /// Parse and buffer a line, returning the buffered entry
    pub fn process_line(
        &self,
        raw: &str,
        source: LogSource,
        operation_id: Option<&str>,
    ) -> ParsedLogEntry {
        let entry = self.parse_line(raw, source, operation_id);
        self.add_log_entry(entry.clone());
        entry
    }

    /// All buffered entries, oldest to newest
    pub fn all_logs(&self) -> Vec<ParsedLogEntry> {
        self.buffer.read().to_vec()
    }

    /// The last N buffered entries, oldest first
    pub fn recent_logs(&self, count: usize) -> Vec<ParsedLogEntry> {
        self.buffer.read().tail(count)
    }

    pub fn filtered_logs(&self, filter: &LogFilter) -> Result<Vec<ParsedLogEntry>, LogError> {
        let compiled = CompiledFilter::new(filter)?;
        Ok(self.filtered_with(&compiled))
    }

    pub fn filtered_with(&self, filter: &CompiledFilter) -> Vec<ParsedLogEntry> {
        self.buffer
            .read()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Search buffered entries, stopping at `max_results`
    pub fn search_logs(
        &self,
        pattern: impl Into<SearchPattern>,
        options: &SearchOptions,
    ) -> Result<Vec<ParsedLogEntry>, LogError> {
        let searcher = Searcher::new(pattern.into(), options)?;
        Ok(self
            .buffer
            .read()
            .iter()
            .filter(|e| searcher.matches(e))
            .take(options.max_results)
            .cloned()
            .collect())
    }

    pub fn buffer_stats(&self) -> BufferStats {
        let buffer = self.buffer.read();
        let mut by_level = LevelCounts::default();
        let mut by_component = BTreeMap::new();
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        for entry in buffer.iter() {
            by_level.increment(entry.level);
            if let Some(component) = &entry.component {
                *by_component.entry(component.clone()).or_insert(0) += 1;
            }
            oldest = Some(oldest.map_or(entry.timestamp, |t| t.min(entry.timestamp)));
            newest = Some(newest.map_or(entry.timestamp, |t| t.max(entry.timestamp)));
        }

        BufferStats {
            total_entries: buffer.len(),
            capacity: buffer.capacity(),
            by_level,
            by_component,
            oldest_entry: oldest,
            newest_entry: newest,
        }
    }

    /// Distinct components, sorted
    pub fn components(&self) -> Vec<String> {
        let buffer = self.buffer.read();
        let set: BTreeSet<&String> = buffer.iter().filter_map(|e| e.component.as_ref()).collect();
        set.into_iter().cloned().collect()
    }

    /// Distinct operation ids, sorted
    pub fn operation_ids(&self) -> Vec<String> {
        let buffer = self.buffer.read();
        let set: BTreeSet<&String> = buffer
            .iter()
            .filter_map(|e| e.operation_id.as_ref())
            .collect();
        set.into_iter().cloned().collect()
    }

    pub fn clear_buffer(&self) {
        self.buffer.write().clear();
        self.events.emit(LogEvent::BufferCleared);
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.read().capacity()
    }
}

impl Default for LogParser {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_BUFFER_SIZE)
    }
}

impl std::fmt::Debug for LogParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let buffer = self.buffer.read();
        f.debug_struct("LogParser")
            .field("len", &buffer.len())
            .field("capacity", &buffer.capacity())
            .finish()
    }
}

/// Guess a level from free text
fn infer_level(text: &str) -> LogLevel {
    let upper = text.to_uppercase();

    if upper.contains("ERROR") || upper.contains("FAIL") {
        LogLevel::Error
    } else if upper.contains("WARN") {
        LogLevel::Warning
    } else if upper.contains("DEBUG") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

/// Normalise a log timestamp and parse it
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, an optional `,mmm` or `.fff` fraction and
/// an optional `Z`/`+HH:MM`/`-HHMM` offset. Offset-less times are UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let mut normalized = text.trim().replacen(',', ".", 1);

    if normalized.len() > 10 && normalized.as_bytes()[10] == b' ' {
        normalized.replace_range(10..11, "T");
    }

    let has_zone = normalized.ends_with('Z')
        || normalized
            .get(11..)
            .is_some_and(|time| time.contains('+') || time.contains('-'));
    if !has_zone {
        normalized.push('Z');
    }

    DateTime::parse_from_rfc3339(&normalized)
        .or_else(|_| DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
