//! Size-adaptive compression engine.
//!
//! Inputs at or above the streaming threshold go through a chunked,
//! bounded-memory read→transform→write pipeline; smaller inputs are
//! transformed in one buffered pass. Either way a BLAKE3 checksum of the
//! uncompressed bytes is computed incrementally during the single read pass.
//! The byte work is blocking and runs on the tokio blocking pool.

use crate::codec::Codec;
use crate::error::CompressError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Configuration for the engine, passed explicitly at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which of the two codecs to use for compression.
    pub codec: Codec,
    /// Compression level, clamped into the codec's valid range.
    pub level: i32,
    /// Inputs at or above this size use the streaming strategy.
    pub streaming_threshold: u64,
    /// Buffer size for the streaming pipeline.
    pub chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            codec: Codec::Gzip,
            level: 6,
            streaming_threshold: 10 * 1024 * 1024,
            chunk_size: 64 * 1024,
        }
    }
}

/// Outcome of a single compression operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionResult {
    /// Size of the uncompressed input in bytes.
    pub original_size: u64,
    /// Size of the artifact in bytes.
    pub compressed_size: u64,
    /// `compressed_size / original_size`; values ≥ 1 (growth) are valid.
    pub compression_ratio: f64,
    /// Codec that produced the artifact.
    pub algorithm: Codec,
    /// Hex-encoded BLAKE3 of the uncompressed byte stream.
    pub checksum: String,
    /// `original_size - compressed_size`; negative when the artifact grew.
    pub space_saved: i64,
    /// Wall-clock time of the transform.
    pub duration: Duration,
    /// Whether the streaming strategy was chosen.
    pub streaming_used: bool,
}

/// Outcome of a single decompression operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecompressionResult {
    /// Size of the compressed input in bytes.
    pub compressed_size: u64,
    /// Size of the reproduced output in bytes.
    pub decompressed_size: u64,
    /// Codec identified from the extension or magic bytes.
    pub algorithm: Codec,
    /// Hex-encoded BLAKE3 of the decompressed byte stream.
    pub checksum: String,
    /// Wall-clock time of the transform.
    pub duration: Duration,
    /// Whether the streaming strategy was chosen.
    pub streaming_used: bool,
}

/// The byte-level transform. Stateless apart from its configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// The configured codec.
    pub fn codec(&self) -> Codec {
        self.config.codec
    }

    /// Pure, extension-based classification: is this path a compressed
    /// artifact? Looks only at the path string.
    pub fn is_compressed(path: &Path) -> bool {
        Codec::from_extension(path).is_some()
    }

    /// Compress `input` into `output`, choosing the strategy by input size.
    pub async fn compress(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<CompressionResult, CompressError> {
        let config = self.config.clone();
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || compress_sync(&config, &input, &output))
            .await
            .map_err(|e| CompressError::Io(io::Error::other(e)))?
    }

    /// Decompress `input` into `output`. The codec is identified by the
    /// input's extension, falling back to magic-byte sniffing.
    pub async fn decompress(
        &self,
        input: &Path,
        output: &Path,
    ) -> Result<DecompressionResult, CompressError> {
        let config = self.config.clone();
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || decompress_sync(&config, &input, &output))
            .await
            .map_err(|e| CompressError::Io(io::Error::other(e)))?
    }
}

/// Hex-encoded BLAKE3 of a file's bytes, read in bounded chunks.
pub(crate) fn hash_file_sync(path: &Path, chunk_size: usize) -> io::Result<String> {
    let mut reader = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn compress_sync(
    config: &EngineConfig,
    input: &Path,
    output: &Path,
) -> Result<CompressionResult, CompressError> {
    let started = Instant::now();
    let original_size = std::fs::metadata(input)?.len();
    let streaming = original_size >= config.streaming_threshold;
    let mut hasher = blake3::Hasher::new();

    let compressed_size = if streaming {
        let mut reader = File::open(input)?;
        let writer = File::create(output)?;
        let mut encoder = config
            .codec
            .writer(writer, config.level)
            .map_err(|e| CompressError::CompressionFailed(e.to_string()))?;
        let mut buf = vec![0u8; config.chunk_size];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            encoder
                .write_all(&buf[..n])
                .map_err(|e| CompressError::CompressionFailed(e.to_string()))?;
        }
        encoder
            .finish()
            .map_err(|e| CompressError::CompressionFailed(e.to_string()))?;
        std::fs::metadata(output)?.len()
    } else {
        let data = std::fs::read(input)?;
        hasher.update(&data);
        let compressed = config
            .codec
            .compress_bytes(&data, config.level)
            .map_err(|e| CompressError::CompressionFailed(e.to_string()))?;
        std::fs::write(output, &compressed)?;
        compressed.len() as u64
    };

    let compression_ratio = if original_size == 0 {
        1.0
    } else {
        compressed_size as f64 / original_size as f64
    };
    if compression_ratio >= 1.0 && original_size > 0 {
        // Growth is valid for small or incompressible inputs.
        warn!(
            input = %input.display(),
            original_size,
            compressed_size,
            ratio = compression_ratio,
            "artifact did not shrink"
        );
    }

    let result = CompressionResult {
        original_size,
        compressed_size,
        compression_ratio,
        algorithm: config.codec,
        checksum: hasher.finalize().to_hex().to_string(),
        space_saved: original_size as i64 - compressed_size as i64,
        duration: started.elapsed(),
        streaming_used: streaming,
    };
    debug!(
        input = %input.display(),
        output = %output.display(),
        algorithm = %result.algorithm,
        original_size,
        compressed_size,
        streaming,
        "compressed file"
    );
    Ok(result)
}

fn identify_codec(input: &Path) -> Result<Codec, CompressError> {
    if let Some(codec) = Codec::from_extension(input) {
        return Ok(codec);
    }
    let mut header = [0u8; 4];
    let mut reader = File::open(input)?;
    let n = reader.read(&mut header)?;
    Codec::from_magic_bytes(&header[..n]).ok_or_else(|| {
        CompressError::DecompressionFailed(format!(
            "unable to identify codec for {}",
            input.display()
        ))
    })
}

fn decompress_sync(
    config: &EngineConfig,
    input: &Path,
    output: &Path,
) -> Result<DecompressionResult, CompressError> {
    let started = Instant::now();
    let compressed_size = std::fs::metadata(input)?.len();
    let codec = identify_codec(input)?;
    let streaming = compressed_size >= config.streaming_threshold;
    let mut hasher = blake3::Hasher::new();

    let decompressed_size = if streaming {
        let mut decoder = codec
            .reader(File::open(input)?)
            .map_err(|e| CompressError::DecompressionFailed(e.to_string()))?;
        let mut writer = File::create(output)?;
        let mut buf = vec![0u8; config.chunk_size];
        let mut total: u64 = 0;
        loop {
            let n = decoder
                .read(&mut buf)
                .map_err(|e| CompressError::DecompressionFailed(e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n])?;
            total += n as u64;
        }
        total
    } else {
        let data = std::fs::read(input)?;
        let out = codec
            .decompress_bytes(&data)
            .map_err(|e| CompressError::DecompressionFailed(e.to_string()))?;
        hasher.update(&out);
        std::fs::write(output, &out)?;
        out.len() as u64
    };

    let result = DecompressionResult {
        compressed_size,
        decompressed_size,
        algorithm: codec,
        checksum: hasher.finalize().to_hex().to_string(),
        duration: started.elapsed(),
        streaming_used: streaming,
    };
    debug!(
        input = %input.display(),
        output = %output.display(),
        algorithm = %codec,
        compressed_size,
        decompressed_size,
        streaming,
        "decompressed file"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_threshold_engine(codec: Codec, threshold: u64) -> Engine {
        Engine::new(EngineConfig {
            codec,
            level: 3,
            streaming_threshold: threshold,
            chunk_size: 1024,
        })
    }

    fn write_input(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn roundtrip(engine: &Engine, data: &[u8], expect_streaming: bool) {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "file.bin", data);
        let artifact = dir
            .path()
            .join(format!("file.bin.{}", engine.codec().extension()));
        let restored = dir.path().join("restored.bin");

        let result = engine.compress(&input, &artifact).await.unwrap();
        assert_eq!(result.original_size, data.len() as u64);
        assert_eq!(result.streaming_used, expect_streaming);
        assert_eq!(
            result.checksum,
            blake3::hash(data).to_hex().to_string(),
            "checksum must describe the pre-compression bytes"
        );

        let back = engine.decompress(&artifact, &restored).await.unwrap();
        assert_eq!(back.decompressed_size, data.len() as u64);
        assert_eq!(back.checksum, result.checksum);
        assert_eq!(std::fs::read(&restored).unwrap(), data);
    }

    #[tokio::test]
    async fn test_roundtrip_empty_input() {
        for codec in [Codec::Gzip, Codec::Zstd] {
            roundtrip(&small_threshold_engine(codec, 4096), &[], false).await;
        }
    }

    #[tokio::test]
    async fn test_roundtrip_below_streaming_threshold() {
        let data: Vec<u8> = (0..4095u32).map(|i| (i % 251) as u8).collect();
        for codec in [Codec::Gzip, Codec::Zstd] {
            roundtrip(&small_threshold_engine(codec, 4096), &data, false).await;
        }
    }

    #[tokio::test]
    async fn test_roundtrip_at_and_above_streaming_threshold() {
        for codec in [Codec::Gzip, Codec::Zstd] {
            let at: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
            roundtrip(&small_threshold_engine(codec, 4096), &at, true).await;

            let above: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
            roundtrip(&small_threshold_engine(codec, 4096), &above, true).await;
        }
    }

    #[tokio::test]
    async fn test_tiny_input_growth_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "tiny.bin", b"hi");
        let artifact = dir.path().join("tiny.bin.gz");
        let engine = Engine::new(EngineConfig::default());

        let result = engine.compress(&input, &artifact).await.unwrap();
        assert!(result.compression_ratio >= 1.0);
        assert!(result.space_saved < 0);
    }

    #[tokio::test]
    async fn test_decompress_identifies_codec_by_magic_without_extension() {
        let dir = TempDir::new().unwrap();
        let data = b"some data worth identifying by magic bytes".repeat(10);
        let input = write_input(&dir, "file.bin", &data);
        // Artifact deliberately has no codec extension.
        let artifact = dir.path().join("artifact");
        let restored = dir.path().join("restored.bin");
        let engine = small_threshold_engine(Codec::Zstd, 1 << 20);

        engine.compress(&input, &artifact).await.unwrap();
        let result = engine.decompress(&artifact, &restored).await.unwrap();
        assert_eq!(result.algorithm, Codec::Zstd);
        assert_eq!(std::fs::read(&restored).unwrap(), data);
    }

    #[tokio::test]
    async fn test_decompress_unknown_format_fails() {
        let dir = TempDir::new().unwrap();
        let input = write_input(&dir, "plain", b"definitely not compressed");
        let output = dir.path().join("out");
        let engine = Engine::new(EngineConfig::default());

        let err = engine.decompress(&input, &output).await.unwrap_err();
        assert!(matches!(err, CompressError::DecompressionFailed(_)));
    }

    #[tokio::test]
    async fn test_compress_missing_input_is_io_error() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new(EngineConfig::default());
        let err = engine
            .compress(&dir.path().join("absent"), &dir.path().join("out.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, CompressError::Io(_)));
    }

    #[test]
    fn test_is_compressed_pure_path_classification() {
        assert!(Engine::is_compressed(Path::new("/x/a.txt.gz")));
        assert!(Engine::is_compressed(Path::new("/x/a.txt.zst")));
        assert!(!Engine::is_compressed(Path::new("/x/a.txt")));
        assert!(!Engine::is_compressed(Path::new("/x/a")));
        // Pure: the paths above do not exist.
    }

    #[test]
    fn test_hash_file_matches_one_shot_hash() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let path = write_input(&dir, "h.bin", &data);
        let hashed = hash_file_sync(&path, 512).unwrap();
        assert_eq!(hashed, blake3::hash(&data).to_hex().to_string());
    }
}
