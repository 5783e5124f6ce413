use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dashlog_types::{BufferStats, LogFilter, LogSource, ParsedLogEntry, SearchOptions};

use crate::config::{LogStreamConfig, LogStreamConfigUpdate};
use crate::error::{LogError, StreamError};
use crate::events::{EventBus, LogEvent};
use crate::filter::SearchPattern;
use crate::logfile::{LogRecord, current_log_path, parse_log_file};
use crate::parser::LogParser;
use crate::watch::{self, WatchMode};

/// Read position within the current log file
#[derive(Debug, Default)]
struct FileCursor {
    path: Option<PathBuf>,

    /// Bytes consumed so far
    position: u64,

    /// Modification time at the last read
    modified: Option<SystemTime>,

    /// JSON records consumed so far
    known_records: usize,

    /// Id of the newest JSON record consumed
    last_record_id: Option<String>,

    /// Attached to entries parsed from plain-text tails
    operation_id: Option<String>,
}

/// A running watch or poll task
struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    mode: WatchMode,
}

struct Inner {
    config: RwLock<LogStreamConfig>,

    /// Swapped out when the buffer size changes
    parser: RwLock<LogParser>,

    /// Mirrored entries, oldest first, capped at `history_buffer_size`
    history: Mutex<VecDeque<ParsedLogEntry>>,

    cursor: Mutex<FileCursor>,

    session: Mutex<Option<Session>>,

    /// Serializes start/stop
    lifecycle: tokio::sync::Mutex<()>,

    /// Serializes read cycles so records are never ingested twice
    refresh_lock: tokio::sync::Mutex<()>,

    events: EventBus,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

/// Snapshot of the service state
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingStats {
    pub is_streaming: bool,
    pub current_log_file: Option<PathBuf>,
    pub watch_mode: Option<WatchMode>,
    pub history_size: usize,
    pub last_position: u64,
    pub known_records: usize,
    pub buffer_stats: BufferStats,
}

/// Keeps a `LogParser` in sync with the monthly log file on disk
///
/// Cloning yields another handle onto the same service.
#[derive(Clone)]
pub struct LogStreamingService {
    inner: Arc<Inner>,
}

/// Non-owning handle held by watch tasks
#[derive(Clone)]
pub(crate) struct WeakStreamingService {
    inner: Weak<Inner>,
}

impl WeakStreamingService {
    pub(crate) fn upgrade(&self) -> Option<LogStreamingService> {
        self.inner.upgrade().map(|inner| LogStreamingService { inner })
    }
}

impl LogStreamingService {
    pub fn new(config: LogStreamConfig) -> Self {
        Self::with_events(config, EventBus::default())
    }

    /// Create a service publishing onto an existing bus
    pub fn with_events(config: LogStreamConfig, events: EventBus) -> Self {
        let parser = LogParser::with_events(config.history_buffer_size, events.clone());
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                parser: RwLock::new(parser),
                history: Mutex::new(VecDeque::new()),
                cursor: Mutex::new(FileCursor::default()),
                session: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                refresh_lock: tokio::sync::Mutex::new(()),
                events,
            }),
        }
    }

    fn downgrade(&self) -> WeakStreamingService {
        WeakStreamingService {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to parser and streaming events
    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.events.subscribe()
    }

    /// Current parser handle
    pub fn parser(&self) -> LogParser {
        self.inner.parser.read().clone()
    }

    pub fn config(&self) -> LogStreamConfig {
        self.inner.config.read().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    pub fn current_log_file(&self) -> Option<PathBuf> {
        self.inner.cursor.lock().path.clone()
    }

    /// Start following the current month's log file
    ///
    /// Does nothing if already streaming. Only a failure to create the log
    /// directory is returned; a missing or unreadable file is empty history.
    pub async fn start_streaming(&self, operation_id: Option<&str>) -> Result<(), StreamError> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_streaming() {
            debug!("streaming already started");
            return Ok(());
        }

        let config = self.config();
        tokio::fs::create_dir_all(&config.log_dir)
            .await
            .map_err(|source| StreamError::CreateDir {
                path: config.log_dir.clone(),
                source,
            })?;

        let path = current_log_path(&config.log_dir);
        {
            let mut cursor = self.inner.cursor.lock();
            cursor.path = Some(path.clone());
            cursor.operation_id = operation_id.map(str::to_string);
        }

        self.load_history().await;

        let cancel = CancellationToken::new();
        let (mode, task) = watch::spawn(self.downgrade(), &config, cancel.clone());
        *self.inner.session.lock() = Some(Session { cancel, task, mode });

        let buffer_size = self.parser().len();
        info!(path = %path.display(), buffer_size, mode = mode.as_str(), "log streaming started");
        self.inner.events.emit(LogEvent::StreamingStarted {
            file_path: path,
            buffer_size,
        });
        Ok(())
    }

    /// Stop following the log file
    ///
    /// Does nothing if not streaming. A read cycle already in progress is
    /// allowed to finish; no further cycle is scheduled.
    pub async fn stop_streaming(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };

        session.cancel.cancel();
        if let Err(e) = session.task.await {
            warn!(error = %e, "watch task ended abnormally");
        }

        info!("log streaming stopped");
        self.inner.events.emit(LogEvent::StreamingStopped);
    }

    /// Reload the whole file into history and the parser
    ///
    /// Both are reset first so repeated loads of an unchanged file give the
    /// same result.
    async fn load_history(&self) -> usize {
        let _guard = self.inner.refresh_lock.lock().await;
        let Some(path) = self.current_log_file() else {
            return 0;
        };

        let parser = self.parser();
        self.inner.history.lock().clear();
        parser.clear_buffer();

        let loaded = match tokio::fs::read(&path).await {
            Ok(content) => match parse_log_file(&path, &content) {
                Ok(file) => Some((content.len() as u64, file)),
                Err(e) => {
                    debug!(error = %e, "log file unreadable, starting with empty history");
                    None
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no log history");
                None
            }
        };

        let Some((size, file)) = loaded else {
            let mut cursor = self.inner.cursor.lock();
            cursor.position = 0;
            cursor.modified = None;
            cursor.known_records = 0;
            cursor.last_record_id = None;
            return 0;
        };

        let capacity = self.config().history_buffer_size;
        let count = file.logs.len();
        for record in &file.logs {
            let entry = record.to_entry();
            self.push_history(entry.clone(), capacity);
            parser.add_log_entry(entry);
        }

        let mut cursor = self.inner.cursor.lock();
        cursor.position = size;
        cursor.modified = None;
        cursor.known_records = count;
        cursor.last_record_id = last_id(&file.logs);
        debug!(records = count, "loaded log history");
        count
    }

    /// Run one read cycle, returning the number of entries ingested
    ///
    /// Growth is read as JSON and records after the last one seen are
    /// ingested. A document cut off mid-write is retried on the next cycle.
    /// Any other content is treated as a plain-text tail and only the new
    /// byte range is parsed line by line.
    pub async fn refresh(&self) -> Result<usize, StreamError> {
        let _guard = self.inner.refresh_lock.lock().await;

        let (path, position, operation_id) = {
            let cursor = self.inner.cursor.lock();
            match &cursor.path {
                Some(path) => (path.clone(), cursor.position, cursor.operation_id.clone()),
                None => return Ok(0),
            }
        };

        let (size, modified) = match tokio::fs::metadata(&path).await {
            Ok(meta) => (meta.len(), meta.modified().ok()),
            // Not created yet
            Err(e) if e.kind() == ErrorKind::NotFound && position == 0 => return Ok(0),
            Err(e) => return Err(StreamError::io(&path, e)),
        };

        // A rewrite under retention can keep the size
        if size == position && modified == self.inner.cursor.lock().modified {
            return Ok(0);
        }
        if size < position {
            // The record cursor is kept: a rewrite in progress usually comes
            // back with the same records. `resume_index` starts over if not.
            debug!(size, position, "log file truncated");
            self.inner.cursor.lock().position = size;
            return Ok(0);
        }

        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| StreamError::io(&path, e))?;
        let capacity = self.config().history_buffer_size;

        match parse_log_file(&path, &content) {
            Ok(file) => {
                let fresh: Vec<ParsedLogEntry> = {
                    let mut cursor = self.inner.cursor.lock();
                    let start = resume_index(&file.logs, &cursor);
                    cursor.position = content.len() as u64;
                    cursor.modified = modified;
                    cursor.known_records = file.logs.len();
                    cursor.last_record_id = last_id(&file.logs);
                    file.logs[start..].iter().map(LogRecord::to_entry).collect()
                };

                let parser = self.parser();
                let count = fresh.len();
                for entry in fresh {
                    parser.add_log_entry(entry.clone());
                    self.push_history(entry.clone(), capacity);
                    self.inner.events.emit(LogEvent::NewLogEntry(entry));
                }
                Ok(count)
            }
            Err(StreamError::Json { source, .. }) if source.is_eof() => {
                // Caught mid-write; retry on the next change
                debug!(error = %source, "incomplete log file, retrying later");
                Ok(0)
            }
            Err(_) => {
                let start = (position as usize).min(content.len());
                let tail = String::from_utf8_lossy(&content[start..]);

                let parser = self.parser();
                let mut count = 0;
                for line in tail.lines().filter(|l| !l.trim().is_empty()) {
                    let entry =
                        parser.process_line(line, LogSource::Stdout, operation_id.as_deref());
                    self.push_history(entry.clone(), capacity);
                    self.inner.events.emit(LogEvent::NewLogEntry(entry));
                    count += 1;
                }

                let mut cursor = self.inner.cursor.lock();
                cursor.position = content.len() as u64;
                cursor.modified = modified;
                Ok(count)
            }
        }
    }

    /// Run a read cycle, publishing any failure as a `streamingError` event
    pub(crate) async fn refresh_or_report(&self) {
        if let Err(e) = self.refresh().await {
            self.report_error(&e);
        }
    }

    pub(crate) fn report_error(&self, error: &StreamError) {
        warn!(error = %error, "log streaming error");
        self.inner.events.emit(LogEvent::StreamingError {
            message: error.to_string(),
        });
    }

    /// Follow the month rollover, returning whether the target changed
    pub(crate) fn check_rotation(&self) -> bool {
        let expected = current_log_path(&self.config().log_dir);
        if self.current_log_file().as_ref() == Some(&expected) {
            return false;
        }
        self.retarget(expected);
        true
    }

    /// Point the service at another log file, resetting the read cursor
    pub(crate) fn retarget(&self, path: PathBuf) {
        {
            let mut cursor = self.inner.cursor.lock();
            cursor.path = Some(path.clone());
            cursor.position = 0;
            cursor.modified = None;
            cursor.known_records = 0;
            cursor.last_record_id = None;
        }
        info!(path = %path.display(), "log file rotated");
        self.inner.events.emit(LogEvent::LogRotation { file_path: path });
    }

    fn push_history(&self, entry: ParsedLogEntry, capacity: usize) {
        let mut history = self.inner.history.lock();
        history.push_back(entry);
        while history.len() > capacity.max(1) {
            history.pop_front();
        }
    }

    /// Merge a partial config
    ///
    /// Changing `history_buffer_size` replaces the parser, discarding its
    /// buffered entries. Watch settings apply from the next start.
    pub fn update_config(&self, update: LogStreamConfigUpdate) -> LogStreamConfig {
        let (config, resized) = {
            let mut config = self.inner.config.write();
            let resized = config.apply(update);
            (config.clone(), resized)
        };

        if resized {
            let capacity = config.history_buffer_size;
            *self.inner.parser.write() =
                LogParser::with_events(capacity, self.inner.events.clone());

            let mut history = self.inner.history.lock();
            let excess = history.len().saturating_sub(capacity.max(1));
            history.drain(..excess);
            debug!(capacity, "log buffer resized");
        }

        self.inner.events.emit(LogEvent::ConfigUpdated(config.clone()));
        config
    }

    pub fn filtered_logs(&self, filter: &LogFilter) -> Result<Vec<ParsedLogEntry>, LogError> {
        self.parser().filtered_logs(filter)
    }

    /// The last `count` mirrored entries, oldest first
    pub fn recent_logs(&self, count: usize) -> Vec<ParsedLogEntry> {
        let history = self.inner.history.lock();
        let start = history.len().saturating_sub(count);
        history.iter().skip(start).cloned().collect()
    }

    pub fn search_logs(
        &self,
        pattern: impl Into<SearchPattern>,
        options: &SearchOptions,
    ) -> Result<Vec<ParsedLogEntry>, LogError> {
        self.parser().search_logs(pattern, options)
    }

    pub fn streaming_stats(&self) -> StreamingStats {
        let mode = self.inner.session.lock().as_ref().map(|s| s.mode);
        let (current_log_file, last_position, known_records) = {
            let cursor = self.inner.cursor.lock();
            (cursor.path.clone(), cursor.position, cursor.known_records)
        };

        StreamingStats {
            is_streaming: mode.is_some(),
            current_log_file,
            watch_mode: mode,
            history_size: self.inner.history.lock().len(),
            last_position,
            known_records,
            buffer_stats: self.parser().buffer_stats(),
        }
    }
}

impl std::fmt::Debug for LogStreamingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStreamingService")
            .field("log_dir", &self.inner.config.read().log_dir)
            .field("is_streaming", &self.is_streaming())
            .finish()
    }
}

fn last_id(records: &[LogRecord]) -> Option<String> {
    records
        .last()
        .map(|r| r.id.clone())
        .filter(|id| !id.is_empty())
}

/// Index of the first record not yet ingested
///
/// Resumes after the last seen id, so retention dropping records from the
/// front does not hide new ones. Without ids the record count is used. If
/// the file no longer holds what was seen, every record is new.
fn resume_index(records: &[LogRecord], cursor: &FileCursor) -> usize {
    match &cursor.last_record_id {
        Some(id) => records
            .iter()
            .rposition(|r| &r.id == id)
            .map_or(0, |i| i + 1),
        None if records.len() >= cursor.known_records => cursor.known_records,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logfile::LogFile;
    use crate::writer::LogFileWriter;
    use chrono::Utc;
    use dashlog_types::LogLevel;
    use std::path::Path;
    use std::time::Duration;
    use tokio::sync::broadcast::error::RecvError;

    fn polling_config(dir: &Path) -> LogStreamConfig {
        LogStreamConfig {
            log_dir: dir.to_path_buf(),
            history_buffer_size: 100,
            poll_interval_ms: 20,
            use_file_watcher: false,
        }
    }

    fn record(message: &str, level: &str) -> LogRecord {
        LogRecord {
            id: format!("id-{}", message),
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            message: message.to_string(),
            source: Some("stdout".to_string()),
            operation_id: None,
            component: None,
            metadata: None,
        }
    }

    fn messages(entries: &[ParsedLogEntry]) -> Vec<String> {
        entries.iter().map(|e| e.message.clone()).collect()
    }

    fn drain(rx: &mut broadcast::Receiver<LogEvent>) -> Vec<&'static str> {
        std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.name())
            .collect()
    }

    async fn wait_for(rx: &mut broadcast::Receiver<LogEvent>, name: &str) -> LogEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(event) if event.name() == name => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn write_history(dir: &Path, records: Vec<LogRecord>) -> PathBuf {
        LogFileWriter::new(dir).append_all(records).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let service = LogStreamingService::new(polling_config(&log_dir));
        let mut rx = service.subscribe();

        service.start_streaming(None).await.unwrap();
        service.start_streaming(None).await.unwrap();
        assert!(service.is_streaming());
        assert!(log_dir.is_dir());

        let started: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|n| *n == "streamingStarted")
            .collect();
        assert_eq!(started.len(), 1);

        service.stop_streaming().await;
        service.stop_streaming().await;
        assert!(!service.is_streaming());

        let stopped: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|n| *n == "streamingStopped")
            .collect();
        assert_eq!(stopped.len(), 1);
    }

    #[tokio::test]
    async fn test_started_event_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_history(
            dir.path(),
            vec![record("one", "INFO"), record("two", "ERROR")],
        )
        .await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        let mut rx = service.subscribe();
        service.start_streaming(None).await.unwrap();

        match wait_for(&mut rx, "streamingStarted").await {
            LogEvent::StreamingStarted {
                file_path,
                buffer_size,
            } => {
                assert_eq!(file_path, path);
                assert_eq!(buffer_size, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
        service.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_history_loaded_into_parser() {
        let dir = tempfile::tempdir().unwrap();
        write_history(
            dir.path(),
            vec![
                record("first", "INFO"),
                record("second", "WARNING"),
                record("third", "ERROR"),
            ],
        )
        .await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();

        assert_eq!(
            messages(&service.recent_logs(10)),
            vec!["first", "second", "third"]
        );
        assert_eq!(messages(&service.recent_logs(1)), vec!["third"]);

        let stats = service.streaming_stats();
        assert!(stats.is_streaming);
        assert_eq!(stats.watch_mode, Some(WatchMode::Polling));
        assert_eq!(stats.history_size, 3);
        assert_eq!(stats.known_records, 3);
        assert_eq!(stats.buffer_stats.total_entries, 3);
        assert_eq!(stats.buffer_stats.by_level.warning, 1);

        let errors = service
            .filtered_logs(&LogFilter::new().with_level(LogLevel::Error))
            .unwrap();
        assert_eq!(messages(&errors), vec!["third"]);
        service.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_restart_reproduces_history() {
        let dir = tempfile::tempdir().unwrap();
        write_history(dir.path(), vec![record("a", "INFO"), record("b", "DEBUG")]).await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        let first = service.recent_logs(100);
        service.stop_streaming().await;

        service.start_streaming(None).await.unwrap();
        let second = service.recent_logs(100);
        service.stop_streaming().await;

        assert_eq!(first, second);
        assert_eq!(service.parser().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_history_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        assert!(service.recent_logs(10).is_empty());
        assert_eq!(service.streaming_stats().last_position, 0);
        service.stop_streaming().await;

        tokio::fs::write(current_log_path(dir.path()), b"{\"logs\": [")
            .await
            .unwrap();
        service.start_streaming(None).await.unwrap();
        assert!(service.recent_logs(10).is_empty());
        assert_eq!(service.streaming_stats().known_records, 0);
        service.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_refresh_ingests_new_json_records() {
        let dir = tempfile::tempdir().unwrap();
        write_history(dir.path(), vec![record("old", "INFO")]).await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;
        let mut rx = service.subscribe();

        write_history(
            dir.path(),
            vec![record("new 1", "INFO"), record("new 2", "WARNING")],
        )
        .await;

        assert_eq!(service.refresh().await.unwrap(), 2);
        assert_eq!(service.refresh().await.unwrap(), 0);
        assert_eq!(
            messages(&service.recent_logs(10)),
            vec!["old", "new 1", "new 2"]
        );

        let names = drain(&mut rx);
        assert_eq!(
            names.iter().filter(|n| **n == "newLogEntry").count(),
            2
        );
        assert!(names.contains(&"warning"));
    }

    #[tokio::test]
    async fn test_refresh_plain_text_tail() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(Some("op-42")).await.unwrap();
        service.stop_streaming().await;

        let path = current_log_path(dir.path());
        tokio::fs::write(&path, "INFO: one\n\n   \nERROR: two\n")
            .await
            .unwrap();
        assert_eq!(service.refresh().await.unwrap(), 2);

        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("WARNING: three\n");
        tokio::fs::write(&path, content).await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 1);

        let recent = service.recent_logs(10);
        assert_eq!(messages(&recent), vec!["one", "two", "three"]);
        assert_eq!(recent[1].level, LogLevel::Error);
        assert!(recent.iter().all(|e| e.operation_id.as_deref() == Some("op-42")));
        assert!(recent.iter().all(|e| e.source == LogSource::Stdout));
    }

    #[tokio::test]
    async fn test_truncation_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;

        let path = current_log_path(dir.path());
        tokio::fs::write(&path, "line one\nline two\n").await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 2);

        tokio::fs::write(&path, "x\n").await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 0);
        assert_eq!(service.streaming_stats().last_position, 2);

        tokio::fs::write(&path, "x\nline three\n").await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 1);
        assert_eq!(
            messages(&service.recent_logs(1)),
            vec!["line three"]
        );
    }

    #[tokio::test]
    async fn test_partial_json_write_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;

        let path = current_log_path(dir.path());
        tokio::fs::write(&path, b"{\"logs\": [{\"id\": \"1\"").await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 0);
        assert_eq!(service.streaming_stats().last_position, 0);

        let file = LogFile {
            logs: vec![record("complete", "INFO")],
        };
        tokio::fs::write(&path, serde_json::to_vec(&file).unwrap())
            .await
            .unwrap();
        assert_eq!(service.refresh().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_json_lines_are_read_as_text() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;

        let path = current_log_path(dir.path());
        tokio::fs::write(&path, "{\"msg\":\"one\"}\n{\"msg\":\"two\"}\n")
            .await
            .unwrap();
        assert_eq!(service.refresh().await.unwrap(), 2);
        assert_eq!(service.refresh().await.unwrap(), 0);

        let recent = service.recent_logs(10);
        assert_eq!(
            messages(&recent),
            vec!["{\"msg\":\"one\"}", "{\"msg\":\"two\"}"]
        );
        assert!(recent.iter().all(|e| e.level == LogLevel::Info));

        // Later lines are read from the byte cursor
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("{\"msg\":\"three\"}\n");
        tokio::fs::write(&path, content).await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refresh_follows_writer_retention() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LogFileWriter::new(dir.path()).with_max_entries(2);
        writer.append(record("a", "INFO")).await.unwrap();
        writer.append(record("b", "INFO")).await.unwrap();

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;
        assert_eq!(messages(&service.recent_logs(10)), vec!["a", "b"]);

        // Same record count, same size: only the content moved
        writer.append(record("c", "WARNING")).await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 1);
        assert_eq!(messages(&service.recent_logs(10)), vec!["a", "b", "c"]);

        writer.append(record("d", "INFO")).await.unwrap();
        writer.append(record("e, longer", "INFO")).await.unwrap();
        assert_eq!(service.refresh().await.unwrap(), 2);
        assert_eq!(
            messages(&service.recent_logs(10)),
            vec!["a", "b", "c", "d", "e, longer"]
        );
        assert_eq!(service.streaming_stats().known_records, 2);
    }

    #[tokio::test]
    async fn test_rewritten_file_with_fewer_records_is_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_history(
            dir.path(),
            vec![record("a", "INFO"), record("b", "INFO"), record("c", "INFO")],
        )
        .await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;

        let file = LogFile {
            logs: vec![record("z", "INFO")],
        };
        tokio::fs::write(&path, serde_json::to_vec(&file).unwrap())
            .await
            .unwrap();
        assert_eq!(service.refresh().await.unwrap(), 0);

        write_history(dir.path(), vec![record("y", "ERROR")]).await;
        assert_eq!(service.refresh().await.unwrap(), 2);
        assert_eq!(
            messages(&service.recent_logs(2)),
            vec!["z", "y"]
        );
    }

    #[test]
    fn test_resume_index() {
        let records: Vec<LogRecord> = ["a", "b", "c"]
            .iter()
            .map(|m| record(m, "INFO"))
            .collect();

        let mut cursor = FileCursor {
            last_record_id: Some("id-b".to_string()),
            known_records: 3,
            ..FileCursor::default()
        };
        assert_eq!(resume_index(&records, &cursor), 2);

        cursor.last_record_id = Some("id-gone".to_string());
        assert_eq!(resume_index(&records, &cursor), 0);

        // Records without ids fall back to the count
        cursor.last_record_id = None;
        cursor.known_records = 2;
        assert_eq!(resume_index(&records, &cursor), 2);
        cursor.known_records = 5;
        assert_eq!(resume_index(&records, &cursor), 0);
    }

    #[tokio::test]
    async fn test_polling_picks_up_appends() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        let mut rx = service.subscribe();
        service.start_streaming(None).await.unwrap();

        write_history(dir.path(), vec![record("polled", "INFO")]).await;

        let event = wait_for(&mut rx, "newLogEntry").await;
        assert_eq!(event.entry().map(|e| e.message.as_str()), Some("polled"));
        service.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_native_watcher_picks_up_appends() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogStreamConfig {
            use_file_watcher: true,
            ..polling_config(dir.path())
        };
        let service = LogStreamingService::new(config);
        let mut rx = service.subscribe();
        service.start_streaming(None).await.unwrap();
        assert!(service.streaming_stats().watch_mode.is_some());

        write_history(dir.path(), vec![record("watched", "ERROR")]).await;

        let event = wait_for(&mut rx, "newLogEntry").await;
        assert_eq!(event.entry().map(|e| e.level), Some(LogLevel::Error));
        service.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_start_fails_when_directory_cannot_be_created() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        tokio::fs::write(&blocker, b"file").await.unwrap();

        let service = LogStreamingService::new(polling_config(&blocker.join("logs")));
        let err = service.start_streaming(None).await.unwrap_err();
        assert!(matches!(err, StreamError::CreateDir { .. }));
        assert!(!service.is_streaming());
    }

    #[tokio::test]
    async fn test_read_failure_is_reported_as_event() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;

        // A directory where the log file should be: stat works, read fails
        let path = current_log_path(dir.path());
        tokio::fs::create_dir(&path).await.unwrap();
        tokio::fs::write(path.join("filler"), vec![b'x'; 64]).await.unwrap();

        // Position is 0, so the directory must report a size for the read to run
        let size = tokio::fs::metadata(&path).await.unwrap().len();
        assert!(size > 0, "directory reports zero size");

        let mut rx = service.subscribe();
        service.refresh_or_report().await;
        assert_eq!(drain(&mut rx), vec!["streamingError"]);
    }

    #[tokio::test]
    async fn test_rotation_resets_cursor() {
        let dir = tempfile::tempdir().unwrap();
        write_history(dir.path(), vec![record("this month", "INFO")]).await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;
        let mut rx = service.subscribe();

        let next = dir.path().join("logs-2999-01.json");
        let file = LogFile {
            logs: vec![record("next month", "INFO")],
        };
        tokio::fs::write(&next, serde_json::to_vec(&file).unwrap())
            .await
            .unwrap();

        service.retarget(next.clone());
        assert_eq!(service.current_log_file(), Some(next.clone()));
        assert_eq!(service.streaming_stats().last_position, 0);
        assert_eq!(service.refresh().await.unwrap(), 1);

        match wait_for(&mut rx, "logRotation").await {
            LogEvent::LogRotation { file_path } => assert_eq!(file_path, next),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(
            messages(&service.recent_logs(10)),
            vec!["this month", "next month"]
        );

        // Month rollover check points back at the current month
        assert!(service.check_rotation());
        assert!(!service.check_rotation());
    }

    #[tokio::test]
    async fn test_resize_replaces_parser() {
        let dir = tempfile::tempdir().unwrap();
        write_history(
            dir.path(),
            vec![
                record("1", "INFO"),
                record("2", "INFO"),
                record("3", "INFO"),
            ],
        )
        .await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.stop_streaming().await;
        let mut rx = service.subscribe();

        let config = service.update_config(LogStreamConfigUpdate {
            history_buffer_size: Some(2),
            ..Default::default()
        });
        assert_eq!(config.history_buffer_size, 2);
        assert!(service.parser().is_empty());
        assert_eq!(service.parser().capacity(), 2);
        assert_eq!(messages(&service.recent_logs(10)), vec!["2", "3"]);
        assert_eq!(drain(&mut rx), vec!["configUpdated"]);

        // The new parser still publishes on the service bus
        service
            .parser()
            .process_line("WARNING: after resize", LogSource::Stdout, None);
        assert_eq!(drain(&mut rx), vec!["logEntry", "warning"]);
    }

    #[tokio::test]
    async fn test_config_update_without_resize_keeps_buffer() {
        let dir = tempfile::tempdir().unwrap();
        write_history(dir.path(), vec![record("kept", "INFO")]).await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        service.update_config(LogStreamConfigUpdate {
            poll_interval_ms: Some(500),
            ..Default::default()
        });
        assert_eq!(service.parser().len(), 1);
        assert_eq!(service.config().poll_interval_ms, 500);
        service.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_search_delegates_to_parser() {
        let dir = tempfile::tempdir().unwrap();
        write_history(
            dir.path(),
            vec![
                record("scan library Movies", "INFO"),
                record("scan library Shows", "INFO"),
                record("idle", "INFO"),
            ],
        )
        .await;

        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();

        let results = service
            .search_logs("SCAN", &SearchOptions::default().with_max_results(1))
            .unwrap();
        assert_eq!(messages(&results), vec!["scan library Movies"]);
        service.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_dropping_service_stops_task() {
        let dir = tempfile::tempdir().unwrap();
        let service = LogStreamingService::new(polling_config(dir.path()));
        service.start_streaming(None).await.unwrap();
        let weak = service.downgrade();
        drop(service);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(weak.upgrade().is_none());
    }
}
