//! Transport seam between call state machines and an HTTP/2 stack.
//!
//! A call opens one HTTP/2 stream through [`Transport::open`]. The request
//! side is driven through the returned [`TransportWriter`]; everything the
//! peer sends back is reported to the [`ResponseSink`] handed to `open`,
//! together with a [`TransportReader`] used to apply backpressure.
//!
//! [`HyperTransport`] is the default implementation. Tests and embedders can
//! provide their own.
//!
//! # Feature Flags
//!
//! TLS support requires enabling the appropriate features:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates
//!
//! # Example
//!
//! ```ignore
//! use grpcwire_client::transport::HyperTransport;
//! use std::time::Duration;
//!
//! let transport = HyperTransport::builder()
//!     .h2_keep_alive_interval(Duration::from_secs(30))
//!     .write_buffer_limit(256 * 1024)
//!     .build()?;
//! ```

mod body;
mod connector;
mod hyper;

use std::sync::Arc;

use bytes::Bytes;
use grpcwire_core::DrainHandler;

pub use crate::lifecycle::ResponseSink;
pub use body::RequestBody;
pub use connector::{
    DangerousAcceptAnyCertVerifier, build_https_connector, danger_accept_invalid_certs_config,
    has_tls_support,
};

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub use connector::default_tls_config;

pub use hyper::{HyperTransport, HyperTransportBuilder};

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;

/// Opens HTTP/2 streams for calls.
pub trait Transport: Send + Sync + 'static {
    /// Send the request head and start the stream.
    ///
    /// Must not block. Connection failures are reported asynchronously
    /// through [`ResponseSink::fail`]; the returned writer stays usable (and
    /// inert) in that case.
    fn open(&self, head: http::request::Parts, sink: ResponseSink) -> Arc<dyn TransportWriter>;
}

/// Request-body side of an open stream.
pub trait TransportWriter: Send + Sync {
    /// Queue a chunk of request body. Returns `true` when the outbound
    /// buffer is now full and the caller should wait for the drain handler.
    fn write(&self, data: Bytes) -> bool;

    /// Whether the outbound buffer is over its limit.
    fn write_queue_full(&self) -> bool;

    /// Register the callback run when a full outbound buffer drains.
    fn drain_handler(&self, handler: DrainHandler);

    /// Half-close the request side (END_STREAM).
    fn end(&self);

    /// Abort the stream (RST_STREAM). Idempotent.
    fn reset(&self);
}

/// Response-body side of an open stream: upstream flow control.
pub trait TransportReader: Send + Sync {
    /// Stop reading response body frames until [`resume`](Self::resume).
    fn pause(&self);

    fn resume(&self);
}
