//! Fallback and recovery around the engine.
//!
//! The compression path never loses an upload: if compressing fails for any
//! reason, the original bytes are stored unmodified at the expected location
//! and the store still counts as a success. The decompression path serves
//! from the backup area when the artifact cannot be decoded; only the
//! absence of any backup is a hard error.

use crate::alerts::{ErrorCode, ErrorMonitor};
use crate::backup::BackupArea;
use crate::codec::Codec;
use crate::engine::{CompressionResult, DecompressionResult, Engine};
use crate::error::CompressError;
use crate::sidecar::{ArtifactMetadata, MetadataStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Deadlines and safety knobs for the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Hard deadline for one compression, snapshot to sidecar.
    pub compress_timeout: Duration,
    /// Hard deadline for one decompression. Shorter: readers are waiting.
    pub decompress_timeout: Duration,
    /// Snapshot the original into the backup area before compressing.
    pub backup_before_compress: bool,
    /// Originals at least this large that grow under compression get a
    /// warning log.
    pub growth_warning_min_size: u64,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            compress_timeout: Duration::from_secs(30),
            decompress_timeout: Duration::from_secs(10),
            backup_before_compress: true,
            growth_warning_min_size: 4096,
        }
    }
}

/// What happened to one compression request. `fallback_used = true` still
/// means the bytes are safely stored.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// The bytes are stored, compressed or not.
    pub success: bool,
    /// The original was stored unmodified after a compression failure.
    pub fallback_used: bool,
    /// Where the fallback copy landed.
    pub fallback_path: Option<PathBuf>,
    /// Engine result when compression itself succeeded.
    pub result: Option<CompressionResult>,
    /// The error that triggered fallback, or that sank the store entirely.
    pub error: Option<String>,
}

/// What happened to one decompression request.
#[derive(Debug, Clone)]
pub struct DecompressionOutcome {
    /// The output file holds the original bytes.
    pub success: bool,
    /// The output came from a backup snapshot, not the artifact.
    pub recovery_used: bool,
    /// Engine result when decoding itself succeeded.
    pub result: Option<DecompressionResult>,
    /// The snapshot that served the recovery.
    pub restored_from: Option<PathBuf>,
    /// The error that forced recovery.
    pub error: Option<String>,
}

/// Wraps the engine with backup, deadlines, verification, fallback, and
/// recovery. Cheap to clone is not needed; the service holds it in an `Arc`.
#[derive(Debug)]
pub struct FallbackHandler {
    config: HandlerConfig,
    engine: Engine,
    store: MetadataStore,
    backup: BackupArea,
    monitor: ErrorMonitor,
}

impl FallbackHandler {
    /// Assemble a handler from its parts.
    pub fn new(
        config: HandlerConfig,
        engine: Engine,
        backup: BackupArea,
        monitor: ErrorMonitor,
    ) -> Self {
        Self {
            config,
            engine,
            store: MetadataStore::new(),
            backup,
            monitor,
        }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The backup area.
    pub fn backup(&self) -> &BackupArea {
        &self.backup
    }

    /// The sidecar store.
    pub fn metadata(&self) -> &MetadataStore {
        &self.store
    }

    /// The error monitor.
    pub fn monitor(&self) -> &ErrorMonitor {
        &self.monitor
    }

    /// Where the original bytes land when compression falls back: the output
    /// path with its codec extension stripped, or the output path itself.
    pub fn fallback_destination(output: &Path) -> PathBuf {
        if Codec::from_extension(output).is_some() {
            output.with_extension("")
        } else {
            output.to_path_buf()
        }
    }

    /// Compress `input` into `output`, falling back to an unmodified copy of
    /// the original when anything goes wrong. Never returns `Err`: the
    /// outcome says whether the bytes are stored and how.
    pub async fn compress_with_fallback(&self, input: &Path, output: &Path) -> CompressionOutcome {
        if self.config.backup_before_compress {
            if let Err(e) = self.backup.snapshot(input).await {
                // A failed snapshot does not block the store; fallback still
                // holds the original if compression fails.
                self.monitor.report(
                    ErrorCode::TransientIo,
                    &format!("backup snapshot of {} failed: {e}", input.display()),
                );
            }
        }

        match self.try_compress(input, output).await {
            Ok(result) => CompressionOutcome {
                success: true,
                fallback_used: false,
                fallback_path: None,
                result: Some(result),
                error: None,
            },
            Err(e) => {
                self.monitor.report(
                    e.code(),
                    &format!("compression of {} failed: {e}", input.display()),
                );
                self.store_original(input, output, e).await
            }
        }
    }

    async fn try_compress(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<CompressionResult, CompressError> {
        // Deadline on the await; the blocking transform itself is not
        // interruptible mid-chunk.
        let result = tokio::time::timeout(
            self.config.compress_timeout,
            self.engine.compress(input, output),
        )
        .await
        .map_err(|_| CompressError::Timeout(self.config.compress_timeout))??;

        self.verify_artifact(output, &result)?;
        let metadata = ArtifactMetadata::from_result(input, output, &result);
        self.store.save(&metadata).await?;
        Ok(result)
    }

    /// Artifact must exist and must not be empty unless the original was.
    fn verify_artifact(
        &self,
        output: &Path,
        result: &CompressionResult,
    ) -> Result<(), CompressError> {
        let artifact_len = std::fs::metadata(output).map(|m| m.len()).map_err(|e| {
            CompressError::Integrity(format!("artifact {} missing: {e}", output.display()))
        })?;
        if artifact_len == 0 && result.original_size > 0 {
            return Err(CompressError::Integrity(format!(
                "artifact {} is empty for a {}-byte original",
                output.display(),
                result.original_size
            )));
        }
        if result.compression_ratio >= 1.0 && result.original_size >= self.config.growth_warning_min_size
        {
            warn!(
                artifact = %output.display(),
                original_size = result.original_size,
                compressed_size = result.compressed_size,
                "large original grew under compression"
            );
        }
        Ok(())
    }

    /// The fallback: copy the original, unmodified, to the expected
    /// location, and record it in a sidecar.
    async fn store_original(
        &self,
        input: &Path,
        output: &Path,
        cause: CompressError,
    ) -> CompressionOutcome {
        // Drop any partial artifact before storing next to it. When the
        // output degenerates to the input itself, there is nothing partial
        // to drop and the caller's file must survive.
        if output != input {
            let _ = tokio::fs::remove_file(output).await;
        }
        let dest = Self::fallback_destination(output);
        match self.copy_original(input, &dest).await {
            Ok(()) => {
                self.monitor.report(
                    ErrorCode::Fallback,
                    &format!("stored {} uncompressed after: {cause}", input.display()),
                );
                debug!(
                    input = %input.display(),
                    dest = %dest.display(),
                    "fallback stored original unmodified"
                );
                CompressionOutcome {
                    success: true,
                    fallback_used: true,
                    fallback_path: Some(dest),
                    result: None,
                    error: Some(cause.to_string()),
                }
            }
            Err(copy_err) => {
                self.monitor.report(
                    copy_err.code(),
                    &format!("fallback store of {} failed: {copy_err}", input.display()),
                );
                CompressionOutcome {
                    success: false,
                    fallback_used: false,
                    fallback_path: None,
                    result: None,
                    error: Some(format!("{cause}; fallback also failed: {copy_err}")),
                }
            }
        }
    }

    async fn copy_original(&self, input: &Path, dest: &Path) -> Result<(), CompressError> {
        // The original may already sit at the expected location.
        if dest != input {
            tokio::fs::copy(input, dest).await?;
        }
        let size = tokio::fs::metadata(dest).await?.len();
        let checksum = {
            let path = dest.to_path_buf();
            tokio::task::spawn_blocking(move || crate::engine::hash_file_sync(&path, 64 * 1024))
                .await
                .map_err(|e| CompressError::Io(std::io::Error::other(e)))??
        };
        let metadata = ArtifactMetadata::stored_uncompressed(input, dest, size, checksum);
        self.store.save(&metadata).await
    }

    /// Decompress `input` into `output`; on failure, serve the most recent
    /// backup snapshot of the output's basename. Only the absence of any
    /// snapshot surfaces as `Err` (unrecoverable).
    pub async fn decompress_with_recovery(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<DecompressionOutcome, CompressError> {
        let attempt = tokio::time::timeout(
            self.config.decompress_timeout,
            self.engine.decompress(input, output),
        )
        .await
        .map_err(|_| CompressError::Timeout(self.config.decompress_timeout))
        .and_then(|r| r);

        let cause = match attempt {
            Ok(result) => {
                return Ok(DecompressionOutcome {
                    success: true,
                    recovery_used: false,
                    result: Some(result),
                    restored_from: None,
                    error: None,
                })
            }
            Err(e) => e,
        };
        self.monitor.report(
            cause.code(),
            &format!("decompression of {} failed: {cause}", input.display()),
        );

        let basename = output
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .ok_or_else(|| {
                CompressError::Validation(format!(
                    "output path has no usable file name: {}",
                    output.display()
                ))
            })?;
        match self.backup.restore(&basename, output).await {
            Ok(snapshot) => {
                self.monitor.report(
                    ErrorCode::Recovery,
                    &format!("served {} from backup after: {cause}", output.display()),
                );
                Ok(DecompressionOutcome {
                    success: true,
                    recovery_used: true,
                    result: None,
                    restored_from: Some(snapshot),
                    error: Some(cause.to_string()),
                })
            }
            Err(CompressError::Unrecoverable(_)) => {
                let err = CompressError::Unrecoverable(format!(
                    "cannot reproduce {}: {cause}, and no backup snapshot exists",
                    output.display()
                ));
                self.monitor.report(ErrorCode::Unrecoverable, &err.to_string());
                Err(err)
            }
            Err(e) => {
                self.monitor.report(
                    e.code(),
                    &format!("backup restore of {basename} failed: {e}"),
                );
                Err(e)
            }
        }
    }
}
