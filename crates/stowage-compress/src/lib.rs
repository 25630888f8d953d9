#![warn(missing_docs)]

//! Stowage compression subsystem: background file compression that never
//! loses the original.
//!
//! Write path: Upload → Queue → Fallback handler → Engine (gzip/Zstd, BLAKE3
//! checksum) → Artifact + sidecar metadata
//! Read path:  Artifact → Engine → Original bytes (backup recovery on failure)

pub mod alerts;
pub mod backup;
pub mod codec;
pub mod engine;
pub mod error;
pub mod handler;
pub mod service;
pub mod sidecar;

pub use alerts::{Alert, ErrorCode, ErrorMonitor, MonitorConfig, MonitorObserver};
pub use backup::{BackupArea, BackupConfig};
pub use codec::Codec;
pub use engine::{CompressionResult, DecompressionResult, Engine, EngineConfig};
pub use error::CompressError;
pub use handler::{CompressionOutcome, DecompressionOutcome, FallbackHandler, HandlerConfig};
pub use service::{ServiceConfig, StorageService};
pub use sidecar::{ArtifactMetadata, MetadataStore};
