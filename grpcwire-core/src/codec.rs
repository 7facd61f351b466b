//! Compression codec trait and implementations.
//!
//! This module provides the [`Codec`] trait for per-message compression
//! and implementations for the encodings gRPC peers negotiate:
//! - [`IdentityCodec`]: no compression, always available
//! - [`GzipCodec`]: gzip (requires `gzip` feature, on by default)
//! - [`DeflateCodec`]: zlib-wrapped deflate (requires `deflate` feature)
//! - [`ZstdCodec`]: zstd (requires `zstd` feature)

use bytes::Bytes;
use std::io;
use std::sync::Arc;

#[cfg(any(feature = "gzip", feature = "deflate", feature = "zstd"))]
use std::io::Read;
#[cfg(any(feature = "gzip", feature = "deflate"))]
use std::io::Write;

#[cfg(feature = "gzip")]
use flate2::read::GzDecoder;
#[cfg(feature = "gzip")]
use flate2::write::GzEncoder;

/// Name of the identity (uncompressed) encoding.
pub const IDENTITY: &str = "identity";

/// Codec trait for per-message compression.
///
/// Each gRPC frame whose compression flag is set is compressed independently
/// with the encoding named in the `grpc-encoding` header.
///
/// # Example
///
/// ```ignore
/// use grpcwire_core::Codec;
/// use bytes::Bytes;
/// use std::io;
///
/// struct SnappyCodec;
///
/// impl Codec for SnappyCodec {
///     fn name(&self) -> &'static str { "snappy" }
///
///     fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
///         // ... snappy compression
///     }
///
///     fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
///         // ... snappy decompression
///     }
/// }
/// ```
pub trait Codec: Send + Sync + 'static {
    /// The encoding name used in `grpc-encoding` (e.g., "gzip").
    fn name(&self) -> &'static str;

    fn compress(&self, data: &[u8]) -> io::Result<Bytes>;

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes>;
}

/// A shared, type-erased codec.
#[derive(Clone)]
pub struct BoxedCodec(Arc<dyn Codec>);

impl BoxedCodec {
    pub fn new<C: Codec>(codec: C) -> Self {
        BoxedCodec(Arc::new(codec))
    }

    /// The identity codec.
    pub fn identity() -> Self {
        Self::new(IdentityCodec)
    }

    /// Get the codec name for the `grpc-encoding` header.
    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    /// Whether this codec leaves payloads untouched.
    pub fn is_identity(&self) -> bool {
        self.name() == IDENTITY
    }

    pub fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        self.0.compress(data)
    }

    /// Decompress data. Zero-length input yields an empty payload without
    /// invoking the codec.
    pub fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        if data.is_empty() {
            return Ok(Bytes::new());
        }
        self.0.decompress(data)
    }
}

impl std::fmt::Debug for BoxedCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxedCodec").field(&self.name()).finish()
    }
}

/// Identity codec (no compression).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn name(&self) -> &'static str {
        IDENTITY
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        Ok(Bytes::copy_from_slice(data))
    }
}

/// Gzip codec using flate2.
///
/// Requires the `gzip` feature.
#[cfg(feature = "gzip")]
#[derive(Debug, Clone, Copy)]
pub struct GzipCodec {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

#[cfg(feature = "gzip")]
impl Default for GzipCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "gzip")]
impl GzipCodec {
    /// Level ranges from 0 (no compression) to 9 (best compression).
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "gzip")]
impl Codec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut gz = GzEncoder::new(Vec::with_capacity(data.len() / 2), flate2::Compression::new(self.level));
        gz.write_all(data)?;
        gz.finish().map(Bytes::from)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        read_fully(GzDecoder::new(data), data.len())
    }
}

/// Deflate codec using flate2 (zlib format, as gRPC's "deflate" is defined).
///
/// Requires the `deflate` feature.
#[cfg(feature = "deflate")]
#[derive(Debug, Clone, Copy)]
pub struct DeflateCodec {
    /// Compression level (0-9). Default is 6.
    pub level: u32,
}

#[cfg(feature = "deflate")]
impl Default for DeflateCodec {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "deflate")]
impl DeflateCodec {
    pub fn with_level(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

#[cfg(feature = "deflate")]
impl Codec for DeflateCodec {
    fn name(&self) -> &'static str {
        "deflate"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        let mut zlib = flate2::write::ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2),
            flate2::Compression::new(self.level),
        );
        zlib.write_all(data)?;
        zlib.finish().map(Bytes::from)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        read_fully(flate2::read::ZlibDecoder::new(data), data.len())
    }
}

/// Zstd codec.
///
/// Requires the `zstd` feature.
#[cfg(feature = "zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    /// Compression level (1-22). Default is 3.
    pub level: i32,
}

#[cfg(feature = "zstd")]
impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[cfg(feature = "zstd")]
impl ZstdCodec {
    pub fn with_level(level: i32) -> Self {
        Self {
            level: level.clamp(1, 22),
        }
    }
}

#[cfg(feature = "zstd")]
impl Codec for ZstdCodec {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, data: &[u8]) -> io::Result<Bytes> {
        zstd::bulk::compress(data, self.level)
            .map(Bytes::from)
            .map_err(io::Error::other)
    }

    fn decompress(&self, data: &[u8]) -> io::Result<Bytes> {
        read_fully(zstd::Decoder::new(data)?, data.len())
    }
}

/// Drain a decompressing reader. `hint` is the compressed size.
#[cfg(any(feature = "gzip", feature = "deflate", feature = "zstd"))]
fn read_fully<R: Read>(mut reader: R, hint: usize) -> io::Result<Bytes> {
    let mut out = Vec::with_capacity(hint.saturating_mul(2));
    reader.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

/// Compress bytes, passing them through untouched for identity.
pub fn compress_bytes(bytes: Bytes, codec: &BoxedCodec) -> io::Result<Bytes> {
    if codec.is_identity() {
        return Ok(bytes);
    }
    codec.compress(&bytes)
}

/// Decompress bytes, passing them through untouched for identity.
pub fn decompress_bytes(bytes: Bytes, codec: &BoxedCodec) -> io::Result<Bytes> {
    if codec.is_identity() {
        return Ok(bytes);
    }
    codec.decompress(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "gzip")]
    #[test]
    fn test_gzip_codec_compress_decompress() {
        let codec = GzipCodec::default();
        let original = b"the-value-0 the-value-0 the-value-0 the-value-0";

        let compressed = codec.compress(original).unwrap();
        assert_ne!(&compressed[..], &original[..]);

        let decompressed = codec.decompress(&compressed).unwrap();
        assert_eq!(&decompressed[..], &original[..]);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_gzip_codec_with_level() {
        assert_eq!(GzipCodec::with_level(1).level, 1);
        assert_eq!(GzipCodec::with_level(15).level, 9);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_boxed_decompress_empty_payload() {
        let codec = BoxedCodec::new(GzipCodec::default());
        let out = codec.decompress(&[]).unwrap();
        assert!(out.is_empty());
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_decompress_invalid_gzip() {
        let codec = GzipCodec::default();
        assert!(codec.decompress(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_identity_codec() {
        let codec = BoxedCodec::identity();
        assert!(codec.is_identity());
        assert_eq!(codec.name(), "identity");

        let data = Bytes::from_static(b"hello");
        let out = compress_bytes(data.clone(), &codec).unwrap();
        assert_eq!(out, data);
        // Zero-copy passthrough.
        assert_eq!(out.as_ptr(), data.as_ptr());
        assert_eq!(decompress_bytes(out, &codec).unwrap(), data);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_compress_decompress_bytes_with_codec() {
        let codec = BoxedCodec::new(GzipCodec::default());
        let data = Bytes::from_static(b"Hello, World! Hello, World!");
        let compressed = compress_bytes(data.clone(), &codec).unwrap();
        assert_eq!(decompress_bytes(compressed, &codec).unwrap(), data);
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_boxed_codec_debug() {
        let codec = BoxedCodec::new(GzipCodec::default());
        assert_eq!(format!("{:?}", codec), "BoxedCodec(\"gzip\")");
    }

    #[cfg(feature = "deflate")]
    #[test]
    fn test_deflate_codec_compress_decompress() {
        let codec = DeflateCodec::default();
        let original = b"deflate me deflate me deflate me";
        let compressed = codec.compress(original).unwrap();
        assert_eq!(&codec.decompress(&compressed).unwrap()[..], &original[..]);
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn test_zstd_codec_compress_decompress() {
        let codec = ZstdCodec::default();
        let original = b"zstd zstd zstd zstd zstd zstd";
        let compressed = codec.compress(original).unwrap();
        assert_eq!(&codec.decompress(&compressed).unwrap()[..], &original[..]);
        assert_eq!(ZstdCodec::with_level(0).level, 1);
    }
}
