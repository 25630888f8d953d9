//! Actor-style task queue: a single worker owns all task state and
//! coordinates a bounded number of concurrently running units of work.
//!
//! Callers interact through a cloneable [`QueueHandle`]; the worker runs on
//! the tokio runtime and is reached over an unbounded command channel, so
//! submission is synchronous and never waits on the pipeline.

use crate::error::QueueError;
use crate::task::{Task, TaskHandle, TaskSnapshot, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Configuration for the task queue, passed explicitly at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of tasks in `processing` at any instant.
    pub max_concurrent: usize,
    /// Retries allowed beyond the first attempt. A task that never succeeds
    /// runs its work `max_retries + 1` times.
    pub max_retries: u32,
    /// Base backoff delay; attempt `n` waits `retry_delay * n` (linear).
    pub retry_delay: Duration,
    /// Wall-clock deadline spanning each dispatch-to-completion window.
    pub task_timeout: Duration,
    /// How long `shutdown` waits for active tasks to finish naturally.
    pub shutdown_grace: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            task_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Aggregated queue counters, derived on request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks accepted by `submit`.
    pub total_queued: u64,
    /// Tasks that reached a terminal status.
    pub total_processed: u64,
    /// Tasks that completed successfully.
    pub total_succeeded: u64,
    /// Tasks that exhausted their attempts (or were force-rejected).
    pub total_failed: u64,
    /// Tasks currently in `processing`.
    pub current_active: usize,
    /// Tasks pending dispatch, including retry-backoff waits.
    pub current_pending: usize,
    /// `total_succeeded / total_processed`; 1.0 before anything finishes.
    pub success_rate: f64,
}

/// Lifecycle notifications, replacing event-emitter callbacks with an
/// explicit observer. All methods default to no-ops.
pub trait QueueObserver: Send + Sync {
    /// A task completed successfully.
    fn on_completed(&self, _task_id: &str) {}
    /// A task failed an attempt and will retry after backoff.
    fn on_retry(&self, _task_id: &str, _attempt: u32, _error: &QueueError) {}
    /// A task reached the terminal `Failed` status.
    fn on_failed(&self, _task_id: &str, _error: &QueueError) {}
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl QueueObserver for NoopObserver {}

enum Command<R> {
    Submit {
        task: Task<R>,
        reply: oneshot::Sender<Result<R, QueueError>>,
    },
    RetryReady {
        seq: u64,
    },
    Done {
        seq: u64,
        outcome: Result<R, QueueError>,
    },
    Pause,
    Resume,
    Clear {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    Status {
        id: String,
        reply: oneshot::Sender<Option<TaskSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct TrackedTask<R> {
    seq: u64,
    task: Task<R>,
    reply: oneshot::Sender<Result<R, QueueError>>,
}

/// The queue worker. Constructed and spawned via [`TaskQueue::start`]; all
/// interaction goes through the returned [`QueueHandle`].
pub struct TaskQueue<R> {
    config: QueueConfig,
    observer: Arc<dyn QueueObserver>,
    tx: mpsc::UnboundedSender<Command<R>>,
    rx: mpsc::UnboundedReceiver<Command<R>>,
    pending: VecDeque<TrackedTask<R>>,
    active: HashMap<u64, TrackedTask<R>>,
    waiting: HashMap<u64, TrackedTask<R>>,
    next_seq: u64,
    paused: bool,
    shutting_down: bool,
    total_queued: u64,
    total_processed: u64,
    total_succeeded: u64,
    total_failed: u64,
}

impl<R: Send + 'static> TaskQueue<R> {
    /// Start the queue worker and return a handle to it.
    pub fn start(config: QueueConfig) -> QueueHandle<R> {
        Self::start_with_observer(config, Arc::new(NoopObserver))
    }

    /// Start the queue worker with a lifecycle observer.
    pub fn start_with_observer(
        config: QueueConfig,
        observer: Arc<dyn QueueObserver>,
    ) -> QueueHandle<R> {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(
            max_concurrent = config.max_concurrent,
            max_retries = config.max_retries,
            "starting task queue"
        );
        let worker = TaskQueue {
            config,
            observer,
            tx: tx.clone(),
            rx,
            pending: VecDeque::new(),
            active: HashMap::new(),
            waiting: HashMap::new(),
            next_seq: 0,
            paused: false,
            shutting_down: false,
            total_queued: 0,
            total_processed: 0,
            total_succeeded: 0,
            total_failed: 0,
        };
        tokio::spawn(worker.run());
        QueueHandle { tx }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                Command::Submit { task, reply } => self.handle_submit(task, reply),
                Command::RetryReady { seq } => self.handle_retry_ready(seq),
                Command::Done { seq, outcome } => self.handle_done(seq, outcome),
                Command::Pause => {
                    debug!("queue paused");
                    self.paused = true;
                }
                Command::Resume => {
                    debug!("queue resumed");
                    self.paused = false;
                    self.dispatch();
                }
                Command::Clear { reply } => {
                    let cleared = self.clear_pending();
                    let _ = reply.send(cleared);
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                Command::Status { id, reply } => {
                    let _ = reply.send(self.find_snapshot(&id));
                }
                Command::Shutdown { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
    }

    fn handle_submit(&mut self, task: Task<R>, reply: oneshot::Sender<Result<R, QueueError>>) {
        if self.shutting_down {
            let _ = reply.send(Err(QueueError::ShutDown));
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.total_queued += 1;
        debug!(task_id = %task.id, seq, pending = self.pending.len() + 1, "task queued");
        self.pending.push_back(TrackedTask { seq, task, reply });
        self.dispatch();
    }

    fn dispatch(&mut self) {
        while !self.paused && self.active.len() < self.config.max_concurrent {
            let Some(mut tracked) = self.pending.pop_front() else {
                break;
            };
            tracked.task.status = TaskStatus::Processing;
            tracked.task.started_at = Some(SystemTime::now());
            let seq = tracked.seq;
            let work = tracked.task.work.clone();
            let timeout = self.config.task_timeout;
            let tx = self.tx.clone();
            debug!(
                task_id = %tracked.task.id,
                seq,
                attempt = tracked.task.retries + 1,
                active = self.active.len() + 1,
                "dispatching task"
            );
            self.active.insert(seq, tracked);
            tokio::spawn(async move {
                let outcome = match tokio::time::timeout(timeout, (work)()).await {
                    Ok(result) => result,
                    Err(_) => Err(QueueError::Timeout(timeout)),
                };
                // Ignore send failures: the worker resolves remaining tasks
                // itself when it goes away.
                let _ = tx.send(Command::Done { seq, outcome });
            });
        }
    }

    fn handle_done(&mut self, seq: u64, outcome: Result<R, QueueError>) {
        // A completion for an unknown seq means the task was force-rejected
        // during shutdown; the late result is dropped.
        let Some(mut tracked) = self.active.remove(&seq) else {
            return;
        };
        match outcome {
            Ok(value) => {
                tracked.task.status = TaskStatus::Completed;
                tracked.task.completed_at = Some(SystemTime::now());
                self.total_processed += 1;
                self.total_succeeded += 1;
                debug!(task_id = %tracked.task.id, seq, "task completed");
                self.observer.on_completed(&tracked.task.id);
                let _ = tracked.reply.send(Ok(value));
            }
            Err(err) => {
                tracked.task.retries += 1;
                tracked.task.last_error = Some(err.to_string());
                if tracked.task.retries <= self.config.max_retries && !self.shutting_down {
                    tracked.task.status = TaskStatus::Retrying;
                    let delay = self.config.retry_delay * tracked.task.retries;
                    warn!(
                        task_id = %tracked.task.id,
                        attempt = tracked.task.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "task attempt failed, retrying after backoff"
                    );
                    self.observer.on_retry(&tracked.task.id, tracked.task.retries, &err);
                    let tx = self.tx.clone();
                    self.waiting.insert(seq, tracked);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Command::RetryReady { seq });
                    });
                } else {
                    tracked.task.status = TaskStatus::Failed;
                    tracked.task.completed_at = Some(SystemTime::now());
                    self.total_processed += 1;
                    self.total_failed += 1;
                    warn!(
                        task_id = %tracked.task.id,
                        attempts = tracked.task.retries,
                        error = %err,
                        "task failed permanently"
                    );
                    self.observer.on_failed(&tracked.task.id, &err);
                    let _ = tracked.reply.send(Err(err));
                }
            }
        }
        self.dispatch();
    }

    fn handle_retry_ready(&mut self, seq: u64) {
        let Some(mut tracked) = self.waiting.remove(&seq) else {
            return;
        };
        tracked.task.status = TaskStatus::Pending;
        // Retried work jumps the line: finishing started work is preferred
        // over strict submission-order fairness.
        self.pending.push_front(tracked);
        self.dispatch();
    }

    fn clear_pending(&mut self) -> usize {
        let mut cleared = 0;
        for tracked in self.pending.drain(..) {
            let _ = tracked.reply.send(Err(QueueError::Cancelled));
            cleared += 1;
        }
        for (_, tracked) in self.waiting.drain() {
            let _ = tracked.reply.send(Err(QueueError::Cancelled));
            cleared += 1;
        }
        if cleared > 0 {
            debug!(cleared, "cleared pending tasks");
        }
        cleared
    }

    fn stats(&self) -> QueueStats {
        let success_rate = if self.total_processed == 0 {
            1.0
        } else {
            self.total_succeeded as f64 / self.total_processed as f64
        };
        QueueStats {
            total_queued: self.total_queued,
            total_processed: self.total_processed,
            total_succeeded: self.total_succeeded,
            total_failed: self.total_failed,
            current_active: self.active.len(),
            current_pending: self.pending.len() + self.waiting.len(),
            success_rate,
        }
    }

    fn find_snapshot(&self, id: &str) -> Option<TaskSnapshot> {
        self.active
            .values()
            .find(|t| t.task.id == id)
            .or_else(|| self.waiting.values().find(|t| t.task.id == id))
            .or_else(|| self.pending.iter().find(|t| t.task.id == id))
            .map(|t| t.task.snapshot())
    }

    async fn shutdown(&mut self) {
        self.paused = true;
        self.shutting_down = true;
        let cancelled = self.clear_pending();
        debug!(
            cancelled,
            active = self.active.len(),
            grace_ms = self.config.shutdown_grace.as_millis() as u64,
            "shutting down, waiting for active tasks"
        );
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while !self.active.is_empty() {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(Command::Done { seq, outcome })) => self.handle_done(seq, outcome),
                Ok(Some(Command::Submit { reply, .. })) => {
                    let _ = reply.send(Err(QueueError::ShutDown));
                }
                Ok(Some(Command::Stats { reply })) => {
                    let _ = reply.send(self.stats());
                }
                Ok(Some(Command::Status { id, reply })) => {
                    let _ = reply.send(self.find_snapshot(&id));
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                // Grace period elapsed with tasks still running.
                Err(_) => break,
            }
        }
        for (_, tracked) in self.active.drain() {
            warn!(
                task_id = %tracked.task.id,
                "task still active after shutdown grace, rejecting"
            );
            self.total_processed += 1;
            self.total_failed += 1;
            self.observer.on_failed(&tracked.task.id, &QueueError::ShutDown);
            let _ = tracked.reply.send(Err(QueueError::ShutDown));
        }
        self.clear_pending();
        debug!("queue shut down");
    }
}

/// Cloneable handle to a running [`TaskQueue`] worker.
pub struct QueueHandle<R> {
    tx: mpsc::UnboundedSender<Command<R>>,
}

impl<R> Clone for QueueHandle<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Send + 'static> QueueHandle<R> {
    /// Submit a task. Validation failures are reported synchronously and are
    /// never retried; an accepted task yields a deferred [`TaskHandle`]
    /// without waiting for the work to run.
    pub fn submit(&self, task: Task<R>) -> Result<TaskHandle<R>, QueueError> {
        task.validate()?;
        let id = task.id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Submit {
                task,
                reply: reply_tx,
            })
            .map_err(|_| QueueError::ShutDown)?;
        Ok(TaskHandle { id, rx: reply_rx })
    }

    /// Stop dispatching new tasks. Active tasks keep running.
    pub fn pause(&self) -> Result<(), QueueError> {
        self.tx.send(Command::Pause).map_err(|_| QueueError::ShutDown)
    }

    /// Resume dispatching.
    pub fn resume(&self) -> Result<(), QueueError> {
        self.tx.send(Command::Resume).map_err(|_| QueueError::ShutDown)
    }

    /// Reject every not-yet-started task with a cancellation error and return
    /// how many were cleared. Active tasks are unaffected.
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Clear { reply: reply_tx })
            .map_err(|_| QueueError::ShutDown)?;
        reply_rx.await.map_err(|_| QueueError::ShutDown)
    }

    /// Current queue counters.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Stats { reply: reply_tx })
            .map_err(|_| QueueError::ShutDown)?;
        reply_rx.await.map_err(|_| QueueError::ShutDown)
    }

    /// Look up a non-terminal task by id. Completed and failed tasks are no
    /// longer tracked and report `None`.
    pub async fn task_status(&self, id: &str) -> Result<Option<TaskSnapshot>, QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Status {
                id: id.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| QueueError::ShutDown)?;
        reply_rx.await.map_err(|_| QueueError::ShutDown)
    }

    /// Pause, cancel pending work, wait up to the grace period for active
    /// tasks to finish naturally, then forcibly reject any stragglers.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply: reply_tx })
            .map_err(|_| QueueError::ShutDown)?;
        reply_rx.await.map_err(|_| QueueError::ShutDown)
    }

    /// Whether the worker is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}
