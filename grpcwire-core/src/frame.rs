//! gRPC length-prefixed message framing.
//!
//! ```text
//! [flags:1][length:4 big-endian][payload:length]
//! ```
//!
//! [`encode_frame`] writes one frame. [`FrameDecoder`] accumulates bytes
//! delivered in arbitrary chunks and yields complete frames only.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::BoxedCodec;
use crate::error::FrameError;
use crate::message::GrpcMessage;

/// gRPC frame flags.
pub mod frame_flags {
    /// Payload is not compressed.
    pub const UNCOMPRESSED: u8 = 0x00;
    /// Payload is compressed with the negotiated `grpc-encoding`.
    pub const COMPRESSED: u8 = 0x01;
}

/// Frame header size (flags + length).
pub const FRAME_HEADER_SIZE: usize = 5;

/// Default limit on a received frame's declared length (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Largest payload the 4-byte length prefix can describe.
pub const MAX_FRAME_PAYLOAD: usize = u32::MAX as usize;

/// Wrap a payload in a frame.
///
/// The payload must fit the length prefix ([`MAX_FRAME_PAYLOAD`]); use
/// [`try_encode_frame`] when that is not known.
pub fn encode_frame(payload: &[u8], compressed: bool) -> Bytes {
    let flags = if compressed {
        frame_flags::COMPRESSED
    } else {
        frame_flags::UNCOMPRESSED
    };

    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.put_u8(flags);
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}

/// Wrap a payload in a frame, rejecting payloads the length prefix cannot
/// describe.
pub fn try_encode_frame(payload: &[u8], compressed: bool) -> Result<Bytes, FrameError> {
    frame_length(payload.len())?;
    Ok(encode_frame(payload, compressed))
}

fn frame_length(length: usize) -> Result<u32, FrameError> {
    u32::try_from(length).map_err(|_| FrameError::FrameTooLarge {
        length,
        limit: MAX_FRAME_PAYLOAD,
    })
}

/// Parse a frame header.
///
/// Returns `(flags, length)`, or `None` if fewer than
/// [`FRAME_HEADER_SIZE`] bytes are available.
pub fn parse_frame_header(data: &[u8]) -> Option<(u8, u32)> {
    if data.len() < FRAME_HEADER_SIZE {
        return None;
    }
    let flags = data[0];
    let length = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Some((flags, length))
}

/// Incremental frame decoder.
///
/// Bytes are appended with [`push`](Self::push) as the transport delivers
/// them; [`decode_next`](Self::decode_next) returns the next complete frame
/// as a [`GrpcMessage`], or `None` until enough bytes are buffered. A frame
/// split over any number of deliveries is reassembled, and a delivery holding
/// several frames yields each of them in order.
///
/// Errors are fatal: once `decode_next` fails the decoder must be discarded.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    codec: Option<BoxedCodec>,
    max_message_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(None)
    }
}

impl FrameDecoder {
    /// Create a decoder. `codec` is the negotiated response encoding; `None`
    /// or identity means compressed frames are a protocol error.
    pub fn new(codec: Option<BoxedCodec>) -> Self {
        Self {
            buffer: BytesMut::new(),
            codec,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    /// Set the codec once the response's `grpc-encoding` is known.
    pub fn set_codec(&mut self, codec: Option<BoxedCodec>) {
        self.codec = codec;
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Append a delivery to the accumulation buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet returned as frames.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(message))` if a complete frame was buffered
    /// - `Ok(None)` if more bytes are needed
    /// - `Err(e)` if the buffered header can never form a valid frame
    pub fn decode_next(&mut self) -> Result<Option<GrpcMessage>, FrameError> {
        let Some((flags, length)) = parse_frame_header(&self.buffer) else {
            return Ok(None);
        };

        let compressed = match flags {
            frame_flags::UNCOMPRESSED => false,
            frame_flags::COMPRESSED => true,
            other => return Err(FrameError::InvalidFlags(other)),
        };

        let length = length as usize;
        if length > self.max_message_size {
            return Err(FrameError::FrameTooLarge {
                length,
                limit: self.max_message_size,
            });
        }

        if self.buffer.len() < FRAME_HEADER_SIZE + length {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_SIZE);
        let payload = self.buffer.split_to(length).freeze();

        if !compressed {
            return Ok(Some(GrpcMessage::new(payload)));
        }
        match &self.codec {
            Some(codec) if !codec.is_identity() => {
                Ok(Some(GrpcMessage::compressed(payload, codec.clone())))
            }
            _ => Err(FrameError::CompressedWithoutEncoding),
        }
    }

    /// Push a delivery and decode every complete frame it finishes.
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<GrpcMessage>, FrameError> {
        self.push(chunk);
        let mut messages = Vec::new();
        while let Some(message) = self.decode_next()? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Check the buffer at end of stream. Leftover bytes are a partial frame.
    pub fn finish(&self) -> Result<(), FrameError> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FrameError::Truncated {
                buffered: self.buffer.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(messages: &[GrpcMessage]) -> Vec<Vec<u8>> {
        messages
            .iter()
            .map(|m| m.payload().unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(b"hello", false);
        assert_eq!(&frame[..5], &[0x00, 0, 0, 0, 5]);
        assert_eq!(&frame[5..], b"hello");

        let frame = encode_frame(b"", true);
        assert_eq!(&frame[..], &[0x01, 0, 0, 0, 0]);
    }

    #[test]
    fn test_frame_length_limit() {
        assert_eq!(frame_length(5).unwrap(), 5);
        assert_eq!(frame_length(MAX_FRAME_PAYLOAD).unwrap(), u32::MAX);
        let err = frame_length(MAX_FRAME_PAYLOAD + 1).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { limit, .. } if limit == MAX_FRAME_PAYLOAD));
        assert!(try_encode_frame(b"ok", false).is_ok());
    }

    #[test]
    fn test_parse_frame_header() {
        assert_eq!(parse_frame_header(&[1, 0, 0, 1, 0]), Some((1, 256)));
        assert_eq!(parse_frame_header(&[0, 0, 0]), None);
    }

    #[test]
    fn test_decode_single_frame() {
        let mut decoder = FrameDecoder::default();
        let messages = decoder.decode(&encode_frame(b"hello", false)).unwrap();
        assert_eq!(payloads(&messages), vec![b"hello".to_vec()]);
        assert_eq!(decoder.buffered_len(), 0);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut decoder = FrameDecoder::default();
        let messages = decoder.decode(&encode_frame(b"", false)).unwrap();
        assert_eq!(payloads(&messages), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_decode_multiple_frames_in_one_chunk() {
        let mut data = Vec::new();
        data.extend_from_slice(&encode_frame(b"one", false));
        data.extend_from_slice(&encode_frame(b"two", false));
        data.extend_from_slice(&encode_frame(b"three", false)[..4]);

        let mut decoder = FrameDecoder::default();
        let messages = decoder.decode(&data).unwrap();
        assert_eq!(payloads(&messages), vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(decoder.buffered_len(), 4);

        let rest = &encode_frame(b"three", false)[4..];
        let messages = decoder.decode(rest).unwrap();
        assert_eq!(payloads(&messages), vec![b"three".to_vec()]);
    }

    #[test]
    fn test_decode_byte_at_a_time() {
        let frame = encode_frame(b"chunked", false);
        let mut decoder = FrameDecoder::default();
        for (i, byte) in frame.iter().enumerate() {
            let messages = decoder.decode(&[*byte]).unwrap();
            if i + 1 < frame.len() {
                assert!(messages.is_empty(), "partial frame emitted at byte {i}");
            } else {
                assert_eq!(payloads(&messages), vec![b"chunked".to_vec()]);
            }
        }
    }

    #[test]
    fn test_compressed_frame_without_encoding_is_error() {
        let mut decoder = FrameDecoder::default();
        let err = decoder.decode(&encode_frame(b"xx", true)).unwrap_err();
        assert_eq!(err, FrameError::CompressedWithoutEncoding);

        let mut decoder = FrameDecoder::new(Some(BoxedCodec::identity()));
        assert!(decoder.decode(&encode_frame(b"xx", true)).is_err());
    }

    #[test]
    fn test_invalid_flags() {
        let mut decoder = FrameDecoder::default();
        let err = decoder.decode(&[0x02, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err, FrameError::InvalidFlags(0x02));
    }

    #[test]
    fn test_frame_too_large_detected_from_header() {
        let mut decoder = FrameDecoder::default().with_max_message_size(16);
        // Only the header is buffered; the declared length alone is fatal.
        let err = decoder.decode(&[0x00, 0, 0, 0, 17]).unwrap_err();
        assert_eq!(
            err,
            FrameError::FrameTooLarge {
                length: 17,
                limit: 16
            }
        );
    }

    #[test]
    fn test_finish_with_partial_frame() {
        let mut decoder = FrameDecoder::default();
        decoder.push(&encode_frame(b"partial", false)[..6]);
        assert!(decoder.decode_next().unwrap().is_none());
        assert_eq!(decoder.finish(), Err(FrameError::Truncated { buffered: 6 }));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_decode_gzip_frame_lazily() {
        let codec = crate::CompressionEncoding::Gzip.codec();
        let frame = GrpcMessage::from("the-value-7").encode(&codec).unwrap();
        assert_eq!(frame[0], frame_flags::COMPRESSED);

        let mut decoder = FrameDecoder::new(Some(codec));
        let messages = decoder.decode(&frame).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_compressed());
        assert_eq!(messages[0].encoding(), "gzip");
        assert_eq!(messages[0].payload().unwrap().as_ref(), b"the-value-7");
    }
}
