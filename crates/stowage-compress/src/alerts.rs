//! Rate-limited error monitoring.
//!
//! Every reported error is logged immediately with structured fields. When
//! one error code recurs past a threshold inside a sliding window, a single
//! alert fires and that code's counter resets, so a persistent failure
//! produces periodic alerts instead of a storm.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stowage_queue::{QueueError, QueueObserver};
use tracing::{debug, error, warn};

/// Standardized codes for everything the pipeline reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed request, rejected up front.
    Validation,
    /// A deadline was breached.
    Timeout,
    /// Filesystem trouble, possibly momentary.
    TransientIo,
    /// Checksum or verification mismatch.
    Integrity,
    /// Data could not be produced and no backup exists.
    Unrecoverable,
    /// The encoder failed.
    CompressionFailed,
    /// The decoder failed.
    DecompressionFailed,
    /// The queue abandoned or rejected a task.
    TaskFailed,
    /// A compression fell back to storing the original unmodified.
    Fallback,
    /// A decompression was served from a backup snapshot.
    Recovery,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Validation => "validation",
            ErrorCode::Timeout => "timeout",
            ErrorCode::TransientIo => "transient_io",
            ErrorCode::Integrity => "integrity",
            ErrorCode::Unrecoverable => "unrecoverable",
            ErrorCode::CompressionFailed => "compression_failed",
            ErrorCode::DecompressionFailed => "decompression_failed",
            ErrorCode::TaskFailed => "task_failed",
            ErrorCode::Fallback => "fallback",
            ErrorCode::Recovery => "recovery",
        };
        write!(f, "{s}")
    }
}

/// Alerting thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Occurrences of one code within the window that raise an alert.
    pub alert_threshold: u32,
    /// Sliding window length.
    pub window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// A raised alert, kept for inspection.
#[derive(Debug, Clone)]
pub struct Alert {
    /// The recurring code.
    pub code: ErrorCode,
    /// How many occurrences tripped the threshold.
    pub occurrences: u32,
    /// Context from the report that tripped it.
    pub message: String,
    /// When the alert fired.
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CodeWindow {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, Default)]
struct MonitorState {
    windows: HashMap<ErrorCode, CodeWindow>,
    alerts: Vec<Alert>,
}

/// Shared, cloneable error monitor.
#[derive(Debug, Clone)]
pub struct ErrorMonitor {
    config: MonitorConfig,
    state: Arc<Mutex<MonitorState>>,
}

impl ErrorMonitor {
    /// Create a monitor.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(MonitorState::default())),
        }
    }

    /// Log an occurrence of `code` and raise an alert if it has recurred
    /// past the threshold within the window.
    pub fn report(&self, code: ErrorCode, context: &str) {
        error!(code = %code, context, "pipeline error");
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let entry = state.windows.entry(code).or_insert(CodeWindow {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) > self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        if entry.count >= self.config.alert_threshold {
            let occurrences = entry.count;
            entry.count = 0;
            entry.window_start = now;
            warn!(
                code = %code,
                occurrences,
                window_secs = self.config.window.as_secs(),
                "error rate alert"
            );
            state.alerts.push(Alert {
                code,
                occurrences,
                message: context.to_string(),
                raised_at: Utc::now(),
            });
        }
    }

    /// All alerts raised so far.
    pub fn alerts(&self) -> Vec<Alert> {
        match self.state.lock() {
            Ok(state) => state.alerts.clone(),
            Err(poisoned) => poisoned.into_inner().alerts.clone(),
        }
    }

    /// Occurrences of `code` in its current window.
    pub fn current_count(&self, code: ErrorCode) -> u32 {
        match self.state.lock() {
            Ok(state) => state.windows.get(&code).map(|w| w.count).unwrap_or(0),
            Err(poisoned) => poisoned
                .into_inner()
                .windows
                .get(&code)
                .map(|w| w.count)
                .unwrap_or(0),
        }
    }
}

/// Bridges queue lifecycle events into the monitor.
#[derive(Debug, Clone)]
pub struct MonitorObserver {
    monitor: ErrorMonitor,
}

impl MonitorObserver {
    /// Wrap a monitor for use as a [`QueueObserver`].
    pub fn new(monitor: ErrorMonitor) -> Self {
        Self { monitor }
    }
}

impl QueueObserver for MonitorObserver {
    fn on_completed(&self, id: &str) {
        debug!(task_id = id, "task completed");
    }

    fn on_retry(&self, id: &str, attempt: u32, error: &QueueError) {
        warn!(task_id = id, attempt, error = %error, "task retrying");
    }

    fn on_failed(&self, id: &str, error: &QueueError) {
        let code = match error {
            QueueError::Timeout(_) => ErrorCode::Timeout,
            QueueError::InvalidTask(_) => ErrorCode::Validation,
            _ => ErrorCode::TaskFailed,
        };
        self.monitor.report(code, &format!("task {id}: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(threshold: u32, window: Duration) -> ErrorMonitor {
        ErrorMonitor::new(MonitorConfig {
            alert_threshold: threshold,
            window,
        })
    }

    #[test]
    fn test_alert_fires_at_threshold() {
        let m = monitor(3, Duration::from_secs(60));
        m.report(ErrorCode::TransientIo, "disk glitch");
        m.report(ErrorCode::TransientIo, "disk glitch");
        assert!(m.alerts().is_empty());
        m.report(ErrorCode::TransientIo, "disk glitch");
        let alerts = m.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].code, ErrorCode::TransientIo);
        assert_eq!(alerts[0].occurrences, 3);
    }

    #[test]
    fn test_counter_resets_after_alert() {
        let m = monitor(2, Duration::from_secs(60));
        m.report(ErrorCode::Timeout, "a");
        m.report(ErrorCode::Timeout, "b");
        assert_eq!(m.alerts().len(), 1);
        assert_eq!(m.current_count(ErrorCode::Timeout), 0);
        // The next pair raises a second alert, not a storm of them.
        m.report(ErrorCode::Timeout, "c");
        assert_eq!(m.alerts().len(), 1);
        m.report(ErrorCode::Timeout, "d");
        assert_eq!(m.alerts().len(), 2);
    }

    #[test]
    fn test_codes_are_counted_independently() {
        let m = monitor(2, Duration::from_secs(60));
        m.report(ErrorCode::Timeout, "a");
        m.report(ErrorCode::Integrity, "b");
        assert!(m.alerts().is_empty());
        assert_eq!(m.current_count(ErrorCode::Timeout), 1);
        assert_eq!(m.current_count(ErrorCode::Integrity), 1);
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let m = monitor(2, Duration::from_millis(20));
        m.report(ErrorCode::TransientIo, "a");
        std::thread::sleep(Duration::from_millis(40));
        m.report(ErrorCode::TransientIo, "b");
        assert!(m.alerts().is_empty());
        assert_eq!(m.current_count(ErrorCode::TransientIo), 1);
    }

    #[test]
    fn test_observer_reports_failures() {
        let m = monitor(1, Duration::from_secs(60));
        let obs = MonitorObserver::new(m.clone());
        obs.on_failed("t1", &QueueError::Timeout(Duration::from_secs(5)));
        obs.on_failed("t2", &QueueError::WorkFailed("boom".to_string()));
        let alerts = m.alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].code, ErrorCode::Timeout);
        assert_eq!(alerts[1].code, ErrorCode::TaskFailed);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorCode::TransientIo.to_string(), "transient_io");
        assert_eq!(ErrorCode::Fallback.to_string(), "fallback");
    }
}
