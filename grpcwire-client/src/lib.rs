//! gRPC client transport over HTTP/2, without generated stubs.
//!
//! Calls are opened by method path and exchange opaque message bytes. The
//! crate owns everything between the application and HTTP/2: framing,
//! per-message compression, metadata, deadlines, flow control in both
//! directions and resolution of the terminal [`Status`].
//!
//! ## Features
//!
//! - Unary, server streaming, client streaming and bidirectional calls
//! - Negotiated per-message compression (identity, gzip, deflate, zstd)
//! - Credit-based delivery of response messages (`pause`/`resume`/`fetch`)
//! - Outbound backpressure through `write_queue_full` and drain handlers
//! - Deadlines, sent as `grpc-timeout` and enforced locally
//! - Trailers-only responses and HTTP error mapping
//!
//! ## Example
//!
//! ```ignore
//! use grpcwire_client::GrpcClient;
//!
//! let client = GrpcClient::builder("http://localhost:50051").build()?;
//!
//! // Unary: one message each way.
//! let response = client.unary("echo.Echo/Say", encoded_request).await?;
//! println!("{} bytes", response.message().len());
//! ```
//!
//! ## Streaming Example
//!
//! ```ignore
//! use grpcwire_client::{GrpcClient, GrpcMessage};
//!
//! let mut request = client.request("echo.Echo/Chat")?;
//! let response = request.response();
//!
//! for chunk in chunks {
//!     if request.write(GrpcMessage::new(chunk))? {
//!         // Outbound buffer is full; wait for the drain handler.
//!     }
//! }
//! request.end()?;
//!
//! let response = response.await?;
//! response.message_handler(|message| {
//!     let bytes = message.payload().expect("valid payload");
//!     println!("got {} bytes", bytes.len());
//! });
//! let status = response.finished().await;
//! ```
//!
//! ## Cancellation
//!
//! [`ClientRequestStream::reset`] aborts the stream. A [`ResetHandle`] does
//! the same from anywhere, including inside a response handler:
//!
//! ```ignore
//! let reset = request.reset_handle();
//! response.message_handler(move |_first| reset.reset());
//! assert_eq!(response.finished().await.code(), Code::Cancelled);
//! ```
//!
//! # Feature Flags
//!
//! - `tls` (default): rustls with ring and native root certificates
//! - `tls-ring` / `tls-aws-lc`: crypto provider
//! - `tls-native-roots` / `tls-webpki-roots`: root certificates
//! - `gzip` (default), `deflate`, `zstd`, `compression-full`: codecs
//! - `tracing` (default): spans and events for calls

mod builder;
mod client;
mod error;
mod lifecycle;
mod metadata;
mod options;
mod request;
mod response;
mod status;
pub mod transport;

pub use builder::{ClientBuilder, DEFAULT_USER_AGENT};
pub use client::{GrpcClient, UnaryResponse};
pub use error::ClientError;
pub use lifecycle::{ResponseFuture, ResponseSink};
pub use metadata::{BINARY_SUFFIX, Metadata};
pub use options::{CallOptions, GRPC_TIMEOUT, duration_to_timeout_header};
pub use request::{ClientRequestStream, RequestState, ResetHandle};
pub use response::{ClientResponseStream, ResponseState};
pub use status::{
    GRPC_MESSAGE, GRPC_STATUS, GRPC_STATUS_DETAILS_BIN, decode_grpc_message, encode_grpc_message,
    http_status_to_code, status_from_metadata, status_from_trailers,
};

// Re-export the wire types so applications need a single dependency.
pub use grpcwire_core;
pub use grpcwire_core::{
    BoxedCodec, Code, Codec, CompressionEncoding, CompressionRegistry, FrameError, GrpcMessage,
    Status,
};
