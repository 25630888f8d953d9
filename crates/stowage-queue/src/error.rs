//! Error types for the stowage task queue.

use std::time::Duration;

/// All errors a queued task can resolve with.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The task was rejected at submission because a required field was
    /// missing or empty. Never retried.
    #[error("Invalid task: {0}")]
    InvalidTask(String),
    /// The task's dispatch-to-completion window exceeded the configured
    /// timeout. Counts as a failed attempt for retry accounting.
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),
    /// The unit of work itself reported a failure.
    #[error("Task failed: {0}")]
    WorkFailed(String),
    /// The task was cancelled before it started (queue cleared or shut down).
    #[error("Task cancelled before it started")]
    Cancelled,
    /// The queue was shut down while the task was still running, and the
    /// shutdown grace period elapsed.
    #[error("Queue shut down before the task completed")]
    ShutDown,
}

impl QueueError {
    /// True for errors that terminate a task without any attempt having run.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, QueueError::Cancelled | QueueError::ShutDown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = QueueError::InvalidTask("missing id".to_string());
        assert!(err.to_string().contains("missing id"));

        let err = QueueError::Timeout(Duration::from_millis(250));
        assert!(err.to_string().contains("250"));

        let err = QueueError::WorkFailed("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_is_cancellation() {
        assert!(QueueError::Cancelled.is_cancellation());
        assert!(QueueError::ShutDown.is_cancellation());
        assert!(!QueueError::Timeout(Duration::from_secs(1)).is_cancellation());
        assert!(!QueueError::WorkFailed("x".to_string()).is_cancellation());
    }
}
