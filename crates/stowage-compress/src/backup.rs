//! Timestamped backup snapshots of originals before compression.
//!
//! Snapshots live flat under one root directory, named
//! `{timestamp}_{basename}`, and are pruned to the most recent
//! `max_per_file` per basename. Recovery takes the lexicographically
//! greatest snapshot, which the timestamp prefix makes the newest.

use crate::error::CompressError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where snapshots live and how many to keep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding all snapshots. Created on first use.
    pub root: PathBuf,
    /// Snapshots retained per basename; older ones are pruned.
    pub max_per_file: usize,
}

impl BackupConfig {
    /// Config with the default retention of 3 snapshots per basename.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_per_file: 3,
        }
    }
}

/// The backup area itself.
#[derive(Debug, Clone)]
pub struct BackupArea {
    config: BackupConfig,
}

impl BackupArea {
    /// Create a backup area. The root directory is created lazily.
    pub fn new(config: BackupConfig) -> Self {
        Self { config }
    }

    /// The snapshot root.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Copy `source` into the backup area under a fresh timestamped name,
    /// then prune old snapshots of the same basename.
    pub async fn snapshot(&self, source: &Path) -> Result<PathBuf, CompressError> {
        let basename = file_name(source)?;
        tokio::fs::create_dir_all(&self.config.root).await?;
        // Nanosecond precision keeps rapid snapshots of one file distinct.
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%f");
        let dest = self.config.root.join(format!("{stamp}_{basename}"));
        tokio::fs::copy(source, &dest).await?;
        debug!(source = %source.display(), snapshot = %dest.display(), "took backup snapshot");
        self.prune(&basename).await;
        Ok(dest)
    }

    /// The most recent snapshot for a basename, if any.
    pub async fn find_latest(&self, basename: &str) -> Result<Option<PathBuf>, CompressError> {
        let mut snapshots = self.snapshots_of(basename).await?;
        Ok(snapshots.pop())
    }

    /// Restore the most recent snapshot of `basename` to `dest`.
    /// No snapshot means the data is gone: unrecoverable.
    pub async fn restore(&self, basename: &str, dest: &Path) -> Result<PathBuf, CompressError> {
        let latest = self.find_latest(basename).await?.ok_or_else(|| {
            CompressError::Unrecoverable(format!("no backup snapshot exists for {basename}"))
        })?;
        tokio::fs::copy(&latest, dest).await?;
        debug!(snapshot = %latest.display(), dest = %dest.display(), "restored from backup");
        Ok(latest)
    }

    /// All snapshots for a basename, oldest first.
    async fn snapshots_of(&self, basename: &str) -> Result<Vec<PathBuf>, CompressError> {
        let mut entries = match tokio::fs::read_dir(&self.config.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut matches = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                // Snapshot names are `{stamp}_{basename}` and the stamp
                // contains no underscore, so everything after the first `_`
                // must equal the basename exactly. A suffix match would
                // conflate `report.bin` with `2024_report.bin`.
                if let Some((_, rest)) = name.split_once('_') {
                    if rest == basename {
                        matches.push(entry.path());
                    }
                }
            }
        }
        matches.sort();
        Ok(matches)
    }

    /// Drop all but the newest `max_per_file` snapshots of a basename.
    /// Prune failures are logged, never surfaced.
    async fn prune(&self, basename: &str) {
        let snapshots = match self.snapshots_of(basename).await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(basename, error = %e, "backup prune scan failed");
                return;
            }
        };
        if snapshots.len() <= self.config.max_per_file {
            return;
        }
        let excess = snapshots.len() - self.config.max_per_file;
        for stale in &snapshots[..excess] {
            if let Err(e) = tokio::fs::remove_file(stale).await {
                warn!(snapshot = %stale.display(), error = %e, "failed to prune snapshot");
            }
        }
    }
}

fn file_name(path: &Path) -> Result<String, CompressError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| {
            CompressError::Validation(format!("path has no usable file name: {}", path.display()))
        })
}
