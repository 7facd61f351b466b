//! Decoded gRPC messages.

use std::sync::OnceLock;

use bytes::Bytes;

use crate::codec::{BoxedCodec, compress_bytes};
use crate::error::FrameError;
use crate::frame::try_encode_frame;

/// One application message: an opaque payload plus its compression state.
///
/// A message read from a compressed frame keeps the wire bytes and the codec
/// that produced them. Its payload is decompressed on first access and the
/// result (success or failure) is cached, so decompression runs at most once
/// per message.
pub struct GrpcMessage {
    repr: Repr,
}

enum Repr {
    Plain(Bytes),
    Compressed {
        wire: Bytes,
        codec: BoxedCodec,
        payload: OnceLock<Result<Bytes, FrameError>>,
    },
}

impl GrpcMessage {
    /// An uncompressed message.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            repr: Repr::Plain(payload.into()),
        }
    }

    /// A message whose `wire` bytes were compressed with `codec`.
    pub fn compressed(wire: Bytes, codec: BoxedCodec) -> Self {
        Self {
            repr: Repr::Compressed {
                wire,
                codec,
                payload: OnceLock::new(),
            },
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.repr, Repr::Compressed { .. })
    }

    /// Encoding of the wire bytes, `identity` for plain messages.
    pub fn encoding(&self) -> &'static str {
        match &self.repr {
            Repr::Plain(_) => crate::codec::IDENTITY,
            Repr::Compressed { codec, .. } => codec.name(),
        }
    }

    /// The bytes as they appeared inside the frame.
    pub fn wire_bytes(&self) -> &Bytes {
        match &self.repr {
            Repr::Plain(payload) => payload,
            Repr::Compressed { wire, .. } => wire,
        }
    }

    /// The uncompressed payload.
    pub fn payload(&self) -> Result<&Bytes, FrameError> {
        match &self.repr {
            Repr::Plain(payload) => Ok(payload),
            Repr::Compressed {
                wire,
                codec,
                payload,
            } => payload
                .get_or_init(|| {
                    codec
                        .decompress(wire)
                        .map_err(|e| FrameError::Decompression(e.to_string()))
                })
                .as_ref()
                .map_err(Clone::clone),
        }
    }

    /// Consume the message, returning the uncompressed payload.
    pub fn into_payload(self) -> Result<Bytes, FrameError> {
        self.payload().cloned()
    }

    /// Encode as a complete frame for `codec`.
    ///
    /// Identity yields an uncompressed frame. A message already compressed
    /// with the same codec reuses its wire bytes; otherwise the payload is
    /// compressed before the length is written.
    pub fn encode(&self, codec: &BoxedCodec) -> Result<Bytes, FrameError> {
        if codec.is_identity() {
            return try_encode_frame(self.payload()?, false);
        }
        if let Repr::Compressed { wire, codec: own, .. } = &self.repr {
            if own.name() == codec.name() {
                return try_encode_frame(wire, true);
            }
        }
        let compressed = compress_bytes(self.payload()?.clone(), codec)
            .map_err(|e| FrameError::Compression(e.to_string()))?;
        try_encode_frame(&compressed, true)
    }
}

impl From<Bytes> for GrpcMessage {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

impl From<&'static str> for GrpcMessage {
    fn from(payload: &'static str) -> Self {
        Self::new(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<Vec<u8>> for GrpcMessage {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl std::fmt::Debug for GrpcMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcMessage")
            .field("encoding", &self.encoding())
            .field("wire_len", &self.wire_bytes().len())
            .finish()
    }
}
