//! File change detection for the streaming service
//!
//! Native mode watches the log directory through `notify`; polling mode
//! re-checks the file on a fixed interval. Both loops exit when their
//! cancellation token fires or the service is dropped.

use std::path::Path;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::LogStreamConfig;
use crate::error::StreamError;
use crate::logfile::is_log_file_path;
use crate::stream::WeakStreamingService;

/// How file changes are being detected
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    Native,
    Polling,
}

impl WatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Polling => "polling",
        }
    }
}

type WatchReceiver = mpsc::UnboundedReceiver<notify::Result<Event>>;

/// Start the change-detection task for a streaming session
///
/// Falls back to polling when native watching is disabled or cannot be set
/// up; the fallback is logged, never returned as an error.
pub(crate) fn spawn(
    service: WeakStreamingService,
    config: &LogStreamConfig,
    cancel: CancellationToken,
) -> (WatchMode, JoinHandle<()>) {
    if config.use_file_watcher {
        match native_watcher(&config.log_dir) {
            Ok((watcher, rx)) => {
                debug!(dir = %config.log_dir.display(), "watching log directory");
                let task = tokio::spawn(run_native(service, watcher, rx, cancel));
                return (WatchMode::Native, task);
            }
            Err(e) => {
                warn!(error = %e, "file watcher unavailable, falling back to polling");
            }
        }
    }

    let interval = config.poll_interval();
    debug!(interval_ms = interval.as_millis() as u64, "polling log file");
    let task = tokio::spawn(run_polling(service, interval, cancel));
    (WatchMode::Polling, task)
}

fn native_watcher(dir: &Path) -> Result<(RecommendedWatcher, WatchReceiver), StreamError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

async fn run_native(
    service: WeakStreamingService,
    // Dropping the watcher unregisters it
    _watcher: RecommendedWatcher,
    mut rx: WatchReceiver,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                let Some(service) = service.upgrade() else { break };
                match msg {
                    Some(Ok(event)) => {
                        let change = classify(&event);
                        if change.rotation {
                            service.check_rotation();
                        }
                        if change.rotation || change.touches(service.current_log_file().as_deref()) {
                            service.refresh_or_report().await;
                        }
                    }
                    Some(Err(e)) => service.report_error(&StreamError::Watch(e)),
                    None => break,
                }
            }
        }
    }
}

async fn run_polling(service: WeakStreamingService, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = ticker.tick() => {
                let Some(service) = service.upgrade() else { break };
                service.check_rotation();
                service.refresh_or_report().await;
            }
        }
    }
}

/// What a filesystem event means for the log file
#[derive(Debug, Default)]
struct Change {
    /// A monthly log file appeared or was renamed
    rotation: bool,

    /// File names whose content may have changed
    modified: Vec<std::ffi::OsString>,
}

impl Change {
    fn touches(&self, current: Option<&Path>) -> bool {
        current
            .and_then(|p| p.file_name())
            .is_some_and(|name| self.modified.iter().any(|m| m == name))
    }
}

fn classify(event: &Event) -> Change {
    let mut change = Change::default();

    for path in event.paths.iter().filter(|p| is_log_file_path(p)) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) => {
                change.rotation = true;
            }
            EventKind::Modify(_) => {
                if let Some(name) = path.file_name() {
                    change.modified.push(name.to_os_string());
                }
            }
            _ => {}
        }
    }

    change
}
