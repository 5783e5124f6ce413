//! Log processing for dashlog
//!
//! This crate provides line parsing, ring buffering, filtering and search,
//! and streaming from the dashboard's monthly JSON log files.

mod buffer;
mod config;
mod error;
mod events;
mod filter;
mod logfile;
mod parser;
mod stream;
mod watch;
mod writer;

pub use buffer::RingBuffer;
pub use config::{
    DEFAULT_HISTORY_BUFFER_SIZE, DEFAULT_POLL_INTERVAL_MS, LogStreamConfig, LogStreamConfigUpdate,
};
pub use error::{LogError, StreamError};
pub use events::{EventBus, LogEvent};
pub use filter::{CompiledFilter, SearchPattern, Searcher};
pub use logfile::{
    LOG_FILE_PREFIX, LogFile, LogRecord, current_log_path, is_log_file_name, log_file_name,
    read_log_file,
};
pub use parser::{LogParser, parse_timestamp};
pub use stream::{LogStreamingService, StreamingStats};
pub use watch::WatchMode;
pub use writer::LogFileWriter;

// Re-export types used in our public API
pub use dashlog_types::{
    BufferStats, LevelCounts, LogFilter, LogLevel, LogSource, Metadata, ParsedLogEntry,
    SearchOptions,
};
