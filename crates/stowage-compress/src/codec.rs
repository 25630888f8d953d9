//! The two interchangeable compression codecs and their streaming adapters.
//!
//! Exactly two algorithms are supported, selected by configuration: gzip
//! (Deflate family, `.gz`) and Zstandard (`.zst`). Detection goes by file
//! extension first, falling back to magic bytes when the extension is absent
//! or unknown.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use zstd::stream::read::Decoder as ZstdDecoder;
use zstd::stream::write::Encoder as ZstdEncoder;

/// Compression algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Codec {
    /// Gzip (Deflate family) — ubiquitous, moderate ratio (.gz)
    #[default]
    Gzip,
    /// Zstandard — general-purpose entropy coder, better ratio (.zst)
    Zstd,
}

/// Gzip stream magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// Zstandard frame magic bytes.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Gzip => write!(f, "gzip"),
            Codec::Zstd => write!(f, "zstd"),
        }
    }
}

impl Codec {
    /// The artifact extension this codec tags its output with.
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Gzip => "gz",
            Codec::Zstd => "zst",
        }
    }

    /// Classify a path by its extension alone. Pure: looks only at the path
    /// string, never at the filesystem.
    pub fn from_extension(path: &Path) -> Option<Codec> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Some(Codec::Gzip),
            Some("zst") => Some(Codec::Zstd),
            _ => None,
        }
    }

    /// Identify a codec from the first bytes of a stream.
    pub fn from_magic_bytes(header: &[u8]) -> Option<Codec> {
        if header.len() >= ZSTD_MAGIC.len() && header[..4] == ZSTD_MAGIC {
            Some(Codec::Zstd)
        } else if header.len() >= GZIP_MAGIC.len() && header[..2] == GZIP_MAGIC {
            Some(Codec::Gzip)
        } else {
            None
        }
    }

    /// Clamp a configured level into this codec's valid range.
    pub fn clamp_level(&self, level: i32) -> i32 {
        match self {
            Codec::Gzip => level.clamp(0, 9),
            Codec::Zstd => level.clamp(1, 22),
        }
    }

    /// Compress a byte slice in memory (buffered strategy).
    pub fn compress_bytes(&self, data: &[u8], level: i32) -> io::Result<Vec<u8>> {
        match self {
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(
                    Vec::new(),
                    flate2::Compression::new(self.clamp_level(level) as u32),
                );
                encoder.write_all(data)?;
                encoder.finish()
            }
            Codec::Zstd => zstd::encode_all(data, self.clamp_level(level)),
        }
    }

    /// Decompress a byte slice in memory.
    pub fn decompress_bytes(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        match self {
            Codec::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
            Codec::Zstd => zstd::decode_all(data),
        }
    }

    /// Wrap a writer with this codec's encoder (streaming strategy).
    pub fn writer<W: Write>(&self, writer: W, level: i32) -> io::Result<CodecWriter<W>> {
        match self {
            Codec::Gzip => Ok(CodecWriter::Gzip(GzEncoder::new(
                writer,
                flate2::Compression::new(self.clamp_level(level) as u32),
            ))),
            Codec::Zstd => Ok(CodecWriter::Zstd(ZstdEncoder::new(
                writer,
                self.clamp_level(level),
            )?)),
        }
    }

    /// Wrap a reader with this codec's decoder (streaming strategy).
    pub fn reader<R: Read>(&self, reader: R) -> io::Result<CodecReader<R>> {
        match self {
            Codec::Gzip => Ok(CodecReader::Gzip(GzDecoder::new(reader))),
            Codec::Zstd => Ok(CodecReader::Zstd(ZstdDecoder::new(reader)?)),
        }
    }
}

/// A streaming encoder. Must be [`finish`](CodecWriter::finish)ed so trailer
/// bytes are written and errors surface.
pub enum CodecWriter<W: Write> {
    /// Gzip encoder.
    Gzip(GzEncoder<W>),
    /// Zstandard encoder.
    Zstd(ZstdEncoder<'static, W>),
}

impl<W: Write> CodecWriter<W> {
    /// Flush the trailer and hand back the inner writer.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CodecWriter::Gzip(encoder) => encoder.finish(),
            CodecWriter::Zstd(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for CodecWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CodecWriter::Gzip(encoder) => encoder.write(buf),
            CodecWriter::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CodecWriter::Gzip(encoder) => encoder.flush(),
            CodecWriter::Zstd(encoder) => encoder.flush(),
        }
    }
}

/// A streaming decoder over an arbitrary reader.
pub enum CodecReader<R: Read> {
    /// Gzip decoder.
    Gzip(GzDecoder<R>),
    /// Zstandard decoder.
    Zstd(ZstdDecoder<'static, BufReader<R>>),
}

impl<R: Read> Read for CodecReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            CodecReader::Gzip(decoder) => decoder.read(buf),
            CodecReader::Zstd(decoder) => decoder.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    proptest! {
        #[test]
        fn prop_gzip_roundtrip(data in prop::collection::vec(0u8..=255, 0..50_000)) {
            let c = Codec::Gzip.compress_bytes(&data, 6).unwrap();
            let d = Codec::Gzip.decompress_bytes(&c).unwrap();
            prop_assert_eq!(d, data);
        }
        #[test]
        fn prop_zstd_roundtrip(data in prop::collection::vec(0u8..=255, 0..50_000)) {
            let c = Codec::Zstd.compress_bytes(&data, 3).unwrap();
            let d = Codec::Zstd.decompress_bytes(&c).unwrap();
            prop_assert_eq!(d, data);
        }
        #[test]
        fn prop_magic_bytes_identify_output(data in prop::collection::vec(0u8..=255, 1..10_000)) {
            for codec in [Codec::Gzip, Codec::Zstd] {
                let c = codec.compress_bytes(&data, 3).unwrap();
                prop_assert_eq!(Codec::from_magic_bytes(&c), Some(codec));
            }
        }
    }

    #[test]
    fn empty_roundtrips() {
        for codec in [Codec::Gzip, Codec::Zstd] {
            let c = codec.compress_bytes(&[], 3).unwrap();
            let d = codec.decompress_bytes(&c).unwrap();
            assert_eq!(d, b"");
        }
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(Codec::Gzip.extension(), "gz");
        assert_eq!(Codec::Zstd.extension(), "zst");
        assert_eq!(
            Codec::from_extension(Path::new("/data/report.pdf.gz")),
            Some(Codec::Gzip)
        );
        assert_eq!(
            Codec::from_extension(Path::new("/data/report.pdf.zst")),
            Some(Codec::Zstd)
        );
        assert_eq!(Codec::from_extension(Path::new("/data/report.pdf")), None);
        assert_eq!(Codec::from_extension(Path::new("/data/noext")), None);
    }

    #[test]
    fn test_extension_is_pure() {
        // Classification never touches the filesystem.
        let nonexistent = PathBuf::from("/no/such/dir/file.gz");
        assert_eq!(Codec::from_extension(&nonexistent), Some(Codec::Gzip));
    }

    #[test]
    fn test_magic_bytes_rejects_plain_data() {
        assert_eq!(Codec::from_magic_bytes(b"plain text data"), None);
        assert_eq!(Codec::from_magic_bytes(b""), None);
        assert_eq!(Codec::from_magic_bytes(&[0x1f]), None);
    }

    #[test]
    fn test_level_clamping() {
        assert_eq!(Codec::Gzip.clamp_level(100), 9);
        assert_eq!(Codec::Gzip.clamp_level(-1), 0);
        assert_eq!(Codec::Zstd.clamp_level(0), 1);
        assert_eq!(Codec::Zstd.clamp_level(100), 22);
        assert_eq!(Codec::Zstd.clamp_level(3), 3);
    }

    #[test]
    fn test_streaming_matches_buffered() {
        let data: Vec<u8> = (0..100_000).map(|i| (i % 251) as u8).collect();
        for codec in [Codec::Gzip, Codec::Zstd] {
            let mut writer = codec.writer(Vec::new(), 3).unwrap();
            writer.write_all(&data).unwrap();
            let compressed = writer.finish().unwrap();

            let mut reader = codec.reader(compressed.as_slice()).unwrap();
            let mut decompressed = Vec::new();
            reader.read_to_end(&mut decompressed).unwrap();
            assert_eq!(decompressed, data);

            // The buffered decoder accepts the streamed output too.
            assert_eq!(codec.decompress_bytes(&compressed).unwrap(), data);
        }
    }

    #[test]
    fn test_invalid_data_fails_to_decompress() {
        for codec in [Codec::Gzip, Codec::Zstd] {
            assert!(codec.decompress_bytes(b"this is not compressed").is_err());
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Codec::Gzip), "gzip");
        assert_eq!(format!("{}", Codec::Zstd), "zstd");
    }
}
