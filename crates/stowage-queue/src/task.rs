//! Task records and the deferred result handle.

use crate::error::QueueError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::oneshot;

/// The opaque unit of work a task runs. `Fn` (not `FnOnce`) so the queue can
/// re-invoke the same unit on retry.
pub type WorkFn<R> = Arc<dyn Fn() -> BoxFuture<'static, Result<R, QueueError>> + Send + Sync>;

/// Lifecycle status of a queued task.
///
/// Transitions are exactly `Pending → Processing → {Completed | Retrying →
/// Pending | Failed}`. `Completed` and `Failed` are terminal; a terminal task
/// is removed from tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting in the FIFO for a dispatch slot.
    Pending,
    /// Currently running under its timeout window.
    Processing,
    /// Failed, waiting out the backoff delay before re-entering the FIFO.
    Retrying,
    /// Finished successfully (terminal).
    Completed,
    /// Exhausted all attempts (terminal).
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Processing => write!(f, "processing"),
            TaskStatus::Retrying => write!(f, "retrying"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl TaskStatus {
    /// True once the task has left the queue for good.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// A unit of background work owned by the queue for its lifetime.
///
/// The queue does not deduplicate ids; callers must guarantee uniqueness.
pub struct Task<R> {
    /// Caller-supplied identifier, used for introspection only.
    pub id: String,
    /// Source path the work reads from (informational).
    pub input_path: PathBuf,
    /// Destination path the work writes to (informational).
    pub output_path: PathBuf,
    /// The re-invocable unit of work.
    pub work: WorkFn<R>,
    /// Failed attempts so far.
    pub retries: u32,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task was submitted.
    pub created_at: SystemTime,
    /// When the most recent attempt was dispatched.
    pub started_at: Option<SystemTime>,
    /// When the task reached a terminal status.
    pub completed_at: Option<SystemTime>,
    /// Message of the most recent failure, kept across retries.
    pub last_error: Option<String>,
}

impl<R> Task<R> {
    /// Create a new pending task.
    pub fn new(
        id: impl Into<String>,
        input_path: impl Into<PathBuf>,
        output_path: impl Into<PathBuf>,
        work: WorkFn<R>,
    ) -> Self {
        Self {
            id: id.into(),
            input_path: input_path.into(),
            output_path: output_path.into(),
            work,
            retries: 0,
            status: TaskStatus::Pending,
            created_at: SystemTime::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Check required fields. Called synchronously at submission; a failure
    /// here is never retried.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.id.is_empty() {
            return Err(QueueError::InvalidTask("task id is empty".to_string()));
        }
        if self.input_path.as_os_str().is_empty() {
            return Err(QueueError::InvalidTask("input path is empty".to_string()));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(QueueError::InvalidTask("output path is empty".to_string()));
        }
        Ok(())
    }

    /// Point-in-time view of the task for introspection.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            input_path: self.input_path.clone(),
            output_path: self.output_path.clone(),
            status: self.status,
            retries: self.retries,
            created_at: self.created_at,
            started_at: self.started_at,
            last_error: self.last_error.clone(),
        }
    }
}

impl<R> fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("input_path", &self.input_path)
            .field("output_path", &self.output_path)
            .field("retries", &self.retries)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Read-only view of a tracked task, returned by status queries.
/// Terminal tasks are removed from tracking and report "not found".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task identifier.
    pub id: String,
    /// Source path.
    pub input_path: PathBuf,
    /// Destination path.
    pub output_path: PathBuf,
    /// Current status.
    pub status: TaskStatus,
    /// Failed attempts so far.
    pub retries: u32,
    /// Submission time.
    pub created_at: SystemTime,
    /// Most recent dispatch time.
    pub started_at: Option<SystemTime>,
    /// Most recent failure message.
    pub last_error: Option<String>,
}

/// Deferred result of a submitted task.
///
/// Returned immediately by [`QueueHandle::submit`](crate::QueueHandle::submit);
/// the submitting path never waits for the work itself.
#[derive(Debug)]
pub struct TaskHandle<R> {
    pub(crate) id: String,
    pub(crate) rx: oneshot::Receiver<Result<R, QueueError>>,
}

impl<R> TaskHandle<R> {
    /// The id of the submitted task.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the task to reach a terminal state and take its result.
    pub async fn wait(self) -> Result<R, QueueError> {
        match self.rx.await {
            Ok(result) => result,
            // The queue resolves every tracked task before dropping its
            // sender, so this only fires if the runtime tore the queue down.
            Err(_) => Err(QueueError::ShutDown),
        }
    }
}
