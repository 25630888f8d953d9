//! Error types for the stowage compression subsystem.

use crate::alerts::ErrorCode;
use std::time::Duration;
use stowage_queue::QueueError;

/// All errors that can occur while compressing, decompressing, or managing
/// artifacts and their metadata.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    /// Malformed request, rejected before any work ran. Never retried.
    #[error("Invalid request: {0}")]
    Validation(String),
    /// A hard deadline was breached.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// Filesystem failure, possibly momentary.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Post-compression verification of the artifact failed.
    #[error("Integrity check failed: {0}")]
    Integrity(String),
    /// Decompression failed and no backup snapshot exists. Terminal.
    #[error("Unrecoverable: {0}")]
    Unrecoverable(String),
    /// The encoder rejected the input or its own output.
    #[error("Compression failed: {0}")]
    CompressionFailed(String),
    /// The decoder could not reproduce the original bytes.
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),
    /// The task queue rejected or abandoned the unit of work.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl CompressError {
    /// The standardized observability code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            CompressError::Validation(_) => ErrorCode::Validation,
            CompressError::Timeout(_) => ErrorCode::Timeout,
            CompressError::Io(_) => ErrorCode::TransientIo,
            CompressError::Integrity(_) => ErrorCode::Integrity,
            CompressError::Unrecoverable(_) => ErrorCode::Unrecoverable,
            CompressError::CompressionFailed(_) => ErrorCode::CompressionFailed,
            CompressError::DecompressionFailed(_) => ErrorCode::DecompressionFailed,
            CompressError::Queue(QueueError::Timeout(_)) => ErrorCode::Timeout,
            CompressError::Queue(QueueError::InvalidTask(_)) => ErrorCode::Validation,
            CompressError::Queue(_) => ErrorCode::TaskFailed,
        }
    }
}
