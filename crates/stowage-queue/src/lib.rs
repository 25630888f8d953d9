#![warn(missing_docs)]

//! Stowage background task queue: bounded concurrency, linear-backoff retry,
//! per-task timeout, pause/resume and graceful shutdown.
//!
//! The queue knows nothing about the work it runs. A [`Task`] carries an
//! opaque async callable; callers get a [`TaskHandle`] back immediately and
//! await the result whenever they like. Submission never blocks.

pub mod error;
pub mod queue;
pub mod task;

pub use error::QueueError;
pub use queue::{NoopObserver, QueueConfig, QueueHandle, QueueObserver, QueueStats, TaskQueue};
pub use task::{Task, TaskHandle, TaskSnapshot, TaskStatus, WorkFn};
