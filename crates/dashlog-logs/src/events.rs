use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use dashlog_types::ParsedLogEntry;

use crate::config::LogStreamConfig;

/// Default number of events a lagging subscriber can fall behind
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Events published by the parser and the streaming service
///
/// The serialized `event` tag is what the dashboard subscribes to.
#[derive(Clone, Debug, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum LogEvent {
    /// Any entry added to the parser buffer
    LogEntry(ParsedLogEntry),
    /// ERROR entry added (in addition to `LogEntry`)
    Error(ParsedLogEntry),
    /// WARNING entry added (in addition to `LogEntry`)
    Warning(ParsedLogEntry),
    BufferCleared,
    StreamingStarted {
        file_path: PathBuf,
        buffer_size: usize,
    },
    StreamingStopped,
    /// Entry picked up from the log file
    NewLogEntry(ParsedLogEntry),
    LogRotation {
        file_path: PathBuf,
    },
    StreamingError {
        message: String,
    },
    ConfigUpdated(LogStreamConfig),
}

impl LogEvent {
    /// Event name as seen by subscribers
    pub fn name(&self) -> &'static str {
        match self {
            Self::LogEntry(_) => "logEntry",
            Self::Error(_) => "error",
            Self::Warning(_) => "warning",
            Self::BufferCleared => "bufferCleared",
            Self::StreamingStarted { .. } => "streamingStarted",
            Self::StreamingStopped => "streamingStopped",
            Self::NewLogEntry(_) => "newLogEntry",
            Self::LogRotation { .. } => "logRotation",
            Self::StreamingError { .. } => "streamingError",
            Self::ConfigUpdated(_) => "configUpdated",
        }
    }

    /// The entry carried by this event, if any
    pub fn entry(&self) -> Option<&ParsedLogEntry> {
        match self {
            Self::LogEntry(e) | Self::Error(e) | Self::Warning(e) | Self::NewLogEntry(e) => Some(e),
            _ => None,
        }
    }
}

/// Broadcast fan-out for `LogEvent`s
///
/// Emitting never fails; with no subscribers the event is dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<LogEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: LogEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
