//! The programmatic surface: a storage service that compresses uploads in
//! the background.
//!
//! Writes go through the task queue; reads call the handler directly. One
//! documented contract: callers must not submit two concurrent tasks for the
//! same destination path, and duplicate task ids are not deduplicated.

use crate::alerts::{Alert, ErrorMonitor, MonitorConfig, MonitorObserver};
use crate::backup::{BackupArea, BackupConfig};
use crate::engine::{Engine, EngineConfig};
use crate::error::CompressError;
use crate::handler::{CompressionOutcome, DecompressionOutcome, FallbackHandler, HandlerConfig};
use crate::sidecar::ArtifactMetadata;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stowage_queue::{
    QueueConfig, QueueError, QueueHandle, QueueStats, Task, TaskHandle, TaskQueue, WorkFn,
};
use tracing::info;
use uuid::Uuid;

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Scheduler settings.
    pub queue: QueueConfig,
    /// Codec and sizing settings.
    pub engine: EngineConfig,
    /// Deadlines and fallback settings.
    pub handler: HandlerConfig,
    /// Backup area settings.
    pub backup: BackupConfig,
    /// Alerting settings.
    pub monitor: MonitorConfig,
}

impl ServiceConfig {
    /// Defaults everywhere, with the backup area rooted at `backup_root`.
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            queue: QueueConfig::default(),
            engine: EngineConfig::default(),
            handler: HandlerConfig::default(),
            backup: BackupConfig::new(backup_root),
            monitor: MonitorConfig::default(),
        }
    }
}

/// In-process facade over the queue, engine, and handler.
#[derive(Clone)]
pub struct StorageService {
    queue: QueueHandle<CompressionOutcome>,
    handler: Arc<FallbackHandler>,
    monitor: ErrorMonitor,
}

impl StorageService {
    /// Start the service: spins up the queue worker with an observer wired
    /// into the error monitor.
    pub fn start(config: ServiceConfig) -> Self {
        let monitor = ErrorMonitor::new(config.monitor);
        let engine = Engine::new(config.engine);
        let backup = BackupArea::new(config.backup);
        let handler = Arc::new(FallbackHandler::new(
            config.handler,
            engine,
            backup,
            monitor.clone(),
        ));
        let observer = Arc::new(MonitorObserver::new(monitor.clone()));
        let queue = TaskQueue::start_with_observer(config.queue, observer);
        info!("storage service started");
        Self {
            queue,
            handler,
            monitor,
        }
    }

    /// The fallback handler, for direct engine or metadata access.
    pub fn handler(&self) -> &FallbackHandler {
        &self.handler
    }

    /// Alerts raised by the monitor so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.monitor.alerts()
    }

    /// The artifact path the service will write for an input: the input path
    /// with the configured codec's extension appended.
    pub fn artifact_path(&self, input: &Path) -> PathBuf {
        let mut os = input.as_os_str().to_os_string();
        os.push(".");
        os.push(self.handler.engine().codec().extension());
        PathBuf::from(os)
    }

    /// Queue a compression and wait for its outcome. A `fallback_used`
    /// outcome is a successful store; the error field says what went wrong.
    pub async fn submit_compression(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<CompressionOutcome, CompressError> {
        let handle = self.submit_background(input, output)?;
        handle.wait().await.map_err(CompressError::from)
    }

    /// Queue a compression and return the deferred handle immediately.
    pub fn submit_background(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<TaskHandle<CompressionOutcome>, CompressError> {
        if Engine::is_compressed(input) {
            return Err(CompressError::Validation(format!(
                "input {} is already a compressed artifact",
                input.display()
            )));
        }
        let work = self.compression_work(input, output);
        let task = Task::new(Uuid::new_v4().to_string(), input, output, work);
        self.queue.submit(task).map_err(CompressError::from)
    }

    fn compression_work(&self, input: &Path, output: &Path) -> WorkFn<CompressionOutcome> {
        let handler = Arc::clone(&self.handler);
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        // The handler absorbs failures into the outcome, so the work always
        // resolves Ok and the queue never retries a fallback store.
        Arc::new(move || {
            let handler = Arc::clone(&handler);
            let input = input.clone();
            let output = output.clone();
            Box::pin(async move { Ok(handler.compress_with_fallback(&input, &output).await) })
        })
    }

    /// Reproduce an original from its artifact, serving from backup when the
    /// artifact cannot be decoded. Runs inline, not through the queue.
    pub async fn decompress_with_recovery(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<DecompressionOutcome, CompressError> {
        self.handler.decompress_with_recovery(input, output).await
    }

    /// Sidecar metadata for an artifact, if it has one.
    pub async fn artifact_metadata(
        &self,
        artifact: &Path,
    ) -> Result<Option<ArtifactMetadata>, CompressError> {
        self.handler.metadata().load(artifact).await
    }

    /// Verify an artifact against its sidecar checksum.
    pub async fn validate_artifact(&self, artifact: &Path) -> bool {
        self.handler.metadata().validate_integrity(artifact).await
    }

    /// Scheduler counters.
    pub async fn queue_stats(&self) -> Result<QueueStats, CompressError> {
        self.queue.stats().await.map_err(CompressError::from)
    }

    /// Stop dispatching new work; active tasks finish.
    pub fn pause(&self) -> Result<(), CompressError> {
        self.queue.pause().map_err(CompressError::from)
    }

    /// Resume dispatching.
    pub fn resume(&self) -> Result<(), CompressError> {
        self.queue.resume().map_err(CompressError::from)
    }

    /// Drain the queue: reject pending work, give active tasks a grace
    /// period, then stop the worker.
    pub async fn shutdown(&self) -> Result<(), CompressError> {
        info!("storage service shutting down");
        match self.queue.shutdown().await {
            Ok(()) | Err(QueueError::ShutDown) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> StorageService {
        StorageService::start(ServiceConfig::new(dir.path().join("backups")))
    }

    #[tokio::test]
    async fn test_submit_rejects_already_compressed_input() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let err = svc
            .submit_compression(Path::new("/up/a.bin.gz"), Path::new("/store/a.bin.gz.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, CompressError::Validation(_)));
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_artifact_path_appends_codec_extension() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        assert_eq!(
            svc.artifact_path(Path::new("/up/report.pdf")),
            PathBuf::from("/up/report.pdf.gz")
        );
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_and_wait_compresses() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let input = dir.path().join("up.bin");
        std::fs::write(&input, vec![1u8; 50_000]).unwrap();
        let output = svc.artifact_path(&input);

        let outcome = svc.submit_compression(&input, &output).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.fallback_used);
        assert!(svc.validate_artifact(&output).await);

        let meta = svc.artifact_metadata(&output).await.unwrap().unwrap();
        assert_eq!(meta.original_size, 50_000);

        let stats = svc.queue_stats().await.unwrap();
        assert_eq!(stats.total_succeeded, 1);
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_background_handle_resolves() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let input = dir.path().join("up.bin");
        std::fs::write(&input, b"background store").unwrap();
        let output = svc.artifact_path(&input);

        let handle = svc.submit_background(&input, &output).unwrap();
        let outcome = handle.wait().await.unwrap();
        assert!(outcome.success);
        svc.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.shutdown().await.unwrap();
        svc.shutdown().await.unwrap();
    }
}
