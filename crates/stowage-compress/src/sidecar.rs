//! Sidecar metadata for compressed artifacts.
//!
//! Every artifact gets a `<artifact>.meta` JSON file next to it describing
//! the original file, the transform, and a BLAKE3 checksum of the original
//! bytes. The sidecar is only ever written after the artifact itself is
//! fully materialized, so a sidecar's presence implies a usable artifact.

use crate::codec::Codec;
use crate::engine::{hash_file_sync, CompressionResult};
use crate::error::CompressError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sidecar schema version.
const METADATA_VERSION: u32 = 1;

/// Everything recorded about one stored artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Path of the file as uploaded.
    pub original_path: PathBuf,
    /// Path of the stored artifact (compressed, or the original bytes when
    /// fallback stored them unmodified).
    pub compressed_path: PathBuf,
    /// Whether the artifact actually holds compressed bytes.
    pub is_compressed: bool,
    /// Size of the original in bytes.
    pub original_size: u64,
    /// Size of the artifact in bytes.
    pub compressed_size: u64,
    /// `compressed_size / original_size`.
    pub compression_ratio: f64,
    /// Codec used, if any.
    pub algorithm: Option<Codec>,
    /// When the transform ran.
    pub compressed_at: DateTime<Utc>,
    /// Hex BLAKE3 of the original (uncompressed) bytes.
    pub checksum: String,
    /// When the sidecar was written.
    pub saved_at: DateTime<Utc>,
    /// Sidecar schema version.
    pub version: u32,
}

impl ArtifactMetadata {
    /// Build metadata from an engine result for a compressed artifact.
    pub fn from_result(
        original_path: &Path,
        compressed_path: &Path,
        result: &CompressionResult,
    ) -> Self {
        Self {
            original_path: original_path.to_path_buf(),
            compressed_path: compressed_path.to_path_buf(),
            is_compressed: true,
            original_size: result.original_size,
            compressed_size: result.compressed_size,
            compression_ratio: result.compression_ratio,
            algorithm: Some(result.algorithm),
            compressed_at: Utc::now(),
            checksum: result.checksum.clone(),
            saved_at: Utc::now(),
            version: METADATA_VERSION,
        }
    }

    /// Build metadata for an artifact that stores the original bytes
    /// unmodified (fallback path).
    pub fn stored_uncompressed(
        original_path: &Path,
        stored_path: &Path,
        size: u64,
        checksum: String,
    ) -> Self {
        Self {
            original_path: original_path.to_path_buf(),
            compressed_path: stored_path.to_path_buf(),
            is_compressed: false,
            original_size: size,
            compressed_size: size,
            compression_ratio: 1.0,
            algorithm: None,
            compressed_at: Utc::now(),
            checksum,
            saved_at: Utc::now(),
            version: METADATA_VERSION,
        }
    }
}

/// Reads and writes `<artifact>.meta` sidecar files.
#[derive(Debug, Clone, Default)]
pub struct MetadataStore;

impl MetadataStore {
    /// Create a store.
    pub fn new() -> Self {
        Self
    }

    /// The sidecar path for an artifact: the artifact path with `.meta`
    /// appended.
    pub fn sidecar_path(artifact: &Path) -> PathBuf {
        let mut os = artifact.as_os_str().to_os_string();
        os.push(".meta");
        PathBuf::from(os)
    }

    /// Persist metadata next to its artifact. The artifact must already
    /// exist on disk.
    pub async fn save(&self, metadata: &ArtifactMetadata) -> Result<(), CompressError> {
        if !tokio::fs::try_exists(&metadata.compressed_path)
            .await
            .unwrap_or(false)
        {
            return Err(CompressError::Validation(format!(
                "artifact {} does not exist, refusing to write sidecar",
                metadata.compressed_path.display()
            )));
        }
        let sidecar = Self::sidecar_path(&metadata.compressed_path);
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| CompressError::Validation(format!("sidecar serialization: {e}")))?;
        tokio::fs::write(&sidecar, json).await?;
        debug!(sidecar = %sidecar.display(), "wrote artifact metadata");
        Ok(())
    }

    /// Load the sidecar for an artifact. A missing sidecar is `None`, not
    /// an error; a corrupt sidecar is an integrity error.
    pub async fn load(&self, artifact: &Path) -> Result<Option<ArtifactMetadata>, CompressError> {
        let sidecar = Self::sidecar_path(artifact);
        let bytes = match tokio::fs::read(&sidecar).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let metadata = serde_json::from_slice(&bytes).map_err(|e| {
            CompressError::Integrity(format!("corrupt sidecar {}: {e}", sidecar.display()))
        })?;
        Ok(Some(metadata))
    }

    /// Delete the sidecar for an artifact, if present.
    pub async fn remove(&self, artifact: &Path) -> Result<(), CompressError> {
        let sidecar = Self::sidecar_path(artifact);
        match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Recompute the checksum of the artifact's logical content and compare
    /// it with the sidecar. Any failure along the way (no sidecar, unreadable
    /// artifact, decode error, mismatch) is `false`, never an error.
    pub async fn validate_integrity(&self, artifact: &Path) -> bool {
        let metadata = match self.load(artifact).await {
            Ok(Some(metadata)) => metadata,
            Ok(None) | Err(_) => return false,
        };
        let path = metadata.compressed_path.clone();
        let expected = metadata.checksum.clone();
        let compressed = metadata.is_compressed;
        let algorithm = metadata.algorithm;
        let result = tokio::task::spawn_blocking(move || {
            let actual = if compressed {
                let codec = match algorithm.or_else(|| Codec::from_extension(&path)) {
                    Some(codec) => codec,
                    None => return false,
                };
                match hash_decoded(&path, codec) {
                    Ok(hex) => hex,
                    Err(_) => return false,
                }
            } else {
                match hash_file_sync(&path, 64 * 1024) {
                    Ok(hex) => hex,
                    Err(_) => return false,
                }
            };
            actual == expected
        })
        .await;
        match result {
            Ok(ok) => {
                if !ok {
                    warn!(artifact = %artifact.display(), "integrity validation failed");
                }
                ok
            }
            Err(_) => false,
        }
    }
}

/// BLAKE3 of an artifact's decompressed byte stream, without materializing it.
fn hash_decoded(path: &Path, codec: Codec) -> std::io::Result<String> {
    let mut decoder = codec.reader(std::fs::File::open(path)?)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use tempfile::TempDir;

    async fn compressed_fixture(dir: &TempDir, data: &[u8]) -> (PathBuf, PathBuf, ArtifactMetadata) {
        let input = dir.path().join("upload.bin");
        std::fs::write(&input, data).unwrap();
        let artifact = dir.path().join("upload.bin.gz");
        let engine = Engine::new(EngineConfig::default());
        let result = engine.compress(&input, &artifact).await.unwrap();
        let metadata = ArtifactMetadata::from_result(&input, &artifact, &result);
        (input, artifact, metadata)
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            MetadataStore::sidecar_path(Path::new("/data/a.txt.gz")),
            PathBuf::from("/data/a.txt.gz.meta")
        );
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let (_, artifact, metadata) = compressed_fixture(&dir, b"sidecar roundtrip data").await;
        let store = MetadataStore::new();

        store.save(&metadata).await.unwrap();
        let loaded = store.load(&artifact).await.unwrap().unwrap();
        assert_eq!(loaded.checksum, metadata.checksum);
        assert_eq!(loaded.algorithm, Some(Codec::Gzip));
        assert!(loaded.is_compressed);
        assert_eq!(loaded.version, METADATA_VERSION);
    }

    #[tokio::test]
    async fn test_save_refuses_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let metadata = ArtifactMetadata::stored_uncompressed(
            Path::new("/x/a.bin"),
            &dir.path().join("never-written.gz"),
            10,
            "00".repeat(32),
        );
        let err = MetadataStore::new().save(&metadata).await.unwrap_err();
        assert!(matches!(err, CompressError::Validation(_)));
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new();
        let loaded = store.load(&dir.path().join("nothing.gz")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupt_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("a.gz");
        std::fs::write(MetadataStore::sidecar_path(&artifact), b"{not json").unwrap();
        let err = MetadataStore::new().load(&artifact).await.unwrap_err();
        assert!(matches!(err, CompressError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (_, artifact, metadata) = compressed_fixture(&dir, b"remove me").await;
        let store = MetadataStore::new();
        store.save(&metadata).await.unwrap();

        store.remove(&artifact).await.unwrap();
        assert!(store.load(&artifact).await.unwrap().is_none());
        store.remove(&artifact).await.unwrap();
    }

    #[tokio::test]
    async fn test_validate_integrity_ok_for_compressed_artifact() {
        let dir = TempDir::new().unwrap();
        let (_, artifact, metadata) = compressed_fixture(&dir, b"bytes to verify later").await;
        let store = MetadataStore::new();
        store.save(&metadata).await.unwrap();

        assert!(store.validate_integrity(&artifact).await);
    }

    #[tokio::test]
    async fn test_validate_integrity_detects_tampering() {
        let dir = TempDir::new().unwrap();
        let (input, artifact, metadata) = compressed_fixture(&dir, b"original content").await;
        let store = MetadataStore::new();
        store.save(&metadata).await.unwrap();

        // Replace the artifact with a compression of different bytes.
        std::fs::write(&input, b"tampered content!").unwrap();
        Engine::new(EngineConfig::default())
            .compress(&input, &artifact)
            .await
            .unwrap();
        assert!(!store.validate_integrity(&artifact).await);
    }

    #[tokio::test]
    async fn test_validate_integrity_false_without_sidecar() {
        let dir = TempDir::new().unwrap();
        let (_, artifact, _) = compressed_fixture(&dir, b"no sidecar here").await;
        assert!(!MetadataStore::new().validate_integrity(&artifact).await);
    }

    #[tokio::test]
    async fn test_uncompressed_metadata_validates_raw_bytes() {
        let dir = TempDir::new().unwrap();
        let stored = dir.path().join("fallback.bin");
        let data = b"stored as-is by the fallback path";
        std::fs::write(&stored, data).unwrap();
        let metadata = ArtifactMetadata::stored_uncompressed(
            Path::new("/upload/fallback.bin"),
            &stored,
            data.len() as u64,
            blake3::hash(data).to_hex().to_string(),
        );
        let store = MetadataStore::new();
        store.save(&metadata).await.unwrap();
        assert!(store.validate_integrity(&stored).await);
    }
}
