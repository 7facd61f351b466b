//! Encoding names and the codec lookup table.
//!
//! - [`CompressionEncoding`]: the built-in encodings enabled at compile time
//! - [`CompressionRegistry`]: maps `grpc-encoding` names to codecs, failing
//!   closed on unknown names

use crate::codec::{BoxedCodec, Codec, IDENTITY, IdentityCodec};
use crate::error::FrameError;

#[cfg(feature = "gzip")]
use crate::codec::GzipCodec;

#[cfg(feature = "deflate")]
use crate::codec::DeflateCodec;

#[cfg(feature = "zstd")]
use crate::codec::ZstdCodec;

/// Header naming the encoding of compressed frames in this direction.
pub const GRPC_ENCODING: &str = "grpc-encoding";

/// Header listing the encodings the sender can decompress.
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";

/// Built-in encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionEncoding {
    #[default]
    Identity,
    #[cfg(feature = "gzip")]
    Gzip,
    #[cfg(feature = "deflate")]
    Deflate,
    #[cfg(feature = "zstd")]
    Zstd,
}

impl CompressionEncoding {
    /// All encodings compiled into this build, identity first.
    pub const ALL: &'static [CompressionEncoding] = &[
        Self::Identity,
        #[cfg(feature = "gzip")]
        Self::Gzip,
        #[cfg(feature = "deflate")]
        Self::Deflate,
        #[cfg(feature = "zstd")]
        Self::Zstd,
    ];

    /// Parse a `grpc-encoding` value. Absent or empty means identity.
    pub fn from_header(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim) {
            None | Some("") | Some(IDENTITY) => Some(Self::Identity),
            #[cfg(feature = "gzip")]
            Some("gzip") => Some(Self::Gzip),
            #[cfg(feature = "deflate")]
            Some("deflate") => Some(Self::Deflate),
            #[cfg(feature = "zstd")]
            Some("zstd") => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => IDENTITY,
            #[cfg(feature = "gzip")]
            Self::Gzip => "gzip",
            #[cfg(feature = "deflate")]
            Self::Deflate => "deflate",
            #[cfg(feature = "zstd")]
            Self::Zstd => "zstd",
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// The codec implementing this encoding at its default level.
    pub fn codec(&self) -> BoxedCodec {
        match self {
            Self::Identity => BoxedCodec::new(IdentityCodec),
            #[cfg(feature = "gzip")]
            Self::Gzip => BoxedCodec::new(GzipCodec::default()),
            #[cfg(feature = "deflate")]
            Self::Deflate => BoxedCodec::new(DeflateCodec::default()),
            #[cfg(feature = "zstd")]
            Self::Zstd => BoxedCodec::new(ZstdCodec::default()),
        }
    }
}

/// Lookup table from encoding name to codec.
///
/// The default registry holds every [`CompressionEncoding`] compiled into
/// this build. Custom codecs can be added with [`register`](Self::register);
/// a codec registered under an existing name replaces it.
///
/// ```
/// use grpcwire_core::CompressionRegistry;
///
/// let registry = CompressionRegistry::default();
/// assert!(registry.resolve("identity").unwrap().is_identity());
/// assert!(registry.resolve("snappy").is_err());
/// ```
#[derive(Clone, Debug)]
pub struct CompressionRegistry {
    codecs: Vec<BoxedCodec>,
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        Self {
            codecs: CompressionEncoding::ALL.iter().map(|e| e.codec()).collect(),
        }
    }
}

impl CompressionRegistry {
    /// A registry that only knows identity.
    pub fn identity_only() -> Self {
        Self {
            codecs: vec![BoxedCodec::identity()],
        }
    }

    /// Add or replace a codec.
    pub fn register<C: Codec>(&mut self, codec: C) -> &mut Self {
        let codec = BoxedCodec::new(codec);
        match self.codecs.iter_mut().find(|c| c.name() == codec.name()) {
            Some(slot) => *slot = codec,
            None => self.codecs.push(codec),
        }
        self
    }

    /// Resolve an encoding name. An empty name resolves to identity.
    pub fn resolve(&self, name: &str) -> Result<BoxedCodec, FrameError> {
        let name = name.trim();
        let name = if name.is_empty() { IDENTITY } else { name };
        self.codecs
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| FrameError::UnsupportedEncoding(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    /// Registered encoding names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.codecs.iter().map(|c| c.name())
    }

    /// Value for the `grpc-accept-encoding` header.
    pub fn accept_encoding(&self) -> String {
        self.names().collect::<Vec<_>>().join(",")
    }
}
