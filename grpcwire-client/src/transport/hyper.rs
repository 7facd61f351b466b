//! Hyper-based HTTP/2 transport.
//!
//! This module provides [`HyperTransport`], the default [`Transport`] built
//! on hyper_util's legacy client. Each call runs as one spawned task that
//! sends the request, reports the response head, and then pumps response
//! body frames into the call's [`ResponseSink`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::channel::mpsc::{self, UnboundedSender};
use grpcwire_core::DrainHandler;
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{Client, connect::HttpConnector};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use super::body::{RequestBody, WriteBudget};
use super::connector::{build_https_connector, danger_accept_invalid_certs_config};
use super::{ResponseSink, Transport, TransportReader, TransportWriter};
use crate::ClientError;

/// Type alias for the hyper client with HTTPS connector.
type HyperClient = Client<HttpsConnector<HttpConnector>, RequestBody>;

/// Default outbound buffer per stream before `write` reports it is full.
pub const DEFAULT_WRITE_BUFFER_LIMIT: usize = 64 * 1024;

/// HTTP/2 transport using hyper_util's legacy client.
///
/// Supports h2c for `http://` targets and TLS with ALPN `h2` for
/// `https://` targets, with connection pooling.
///
/// # Example
///
/// ```ignore
/// use grpcwire_client::{GrpcClient, transport::HyperTransport};
///
/// let transport = HyperTransport::builder().build()?;
///
/// let client = GrpcClient::builder("https://api.example.com")
///     .transport(transport)
///     .build()?;
/// ```
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient,
    write_buffer_limit: usize,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport")
            .field("write_buffer_limit", &self.write_buffer_limit)
            .finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a new transport builder.
    pub fn builder() -> HyperTransportBuilder {
        HyperTransportBuilder::new()
    }

    /// Create a new transport with default settings.
    pub fn new() -> Result<Self, ClientError> {
        Self::builder().build()
    }

    pub fn write_buffer_limit(&self) -> usize {
        self.write_buffer_limit
    }
}

impl Transport for HyperTransport {
    fn open(&self, head: http::request::Parts, sink: ResponseSink) -> Arc<dyn TransportWriter> {
        let (tx, rx) = mpsc::unbounded();
        let budget = Arc::new(WriteBudget::new(self.write_buffer_limit));
        let writer = Arc::new(HyperWriter {
            chunks: tx,
            budget: budget.clone(),
            abort: Mutex::new(None),
            reset: AtomicBool::new(false),
        });

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                sink.fail(ClientError::Transport(
                    "no tokio runtime to drive the stream".into(),
                ));
                return writer;
            }
        };

        let request = http::Request::from_parts(head, RequestBody::new(rx, budget));
        let task = run_stream(self.client.clone(), request, sink);
        #[cfg(feature = "tracing")]
        let task = tracing::Instrument::in_current_span(task);

        let handle = runtime.spawn(task);
        writer.set_abort(handle.abort_handle());
        writer
    }
}

/// Drive one stream: send the request, then relay the response.
async fn run_stream(client: HyperClient, request: http::Request<RequestBody>, sink: ResponseSink) {
    let response = match client.request(request).await {
        Ok(response) => response,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "request failed");
            sink.fail(ClientError::Transport(format!("request failed: {e}")));
            return;
        }
    };

    let (parts, mut body) = response.into_parts();
    let gate = Arc::new(ReadGate::default());
    sink.headers(parts.status, parts.headers, gate.clone());

    loop {
        gate.wait_resumed().await;
        match body.frame().await {
            None => {
                sink.end();
                return;
            }
            Some(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "response body failed");
                sink.fail(ClientError::Transport(format!("response body failed: {e}")));
                return;
            }
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => sink.data(data),
                Err(frame) => {
                    if let Ok(trailers) = frame.into_trailers() {
                        sink.trailers(trailers);
                    }
                }
            },
        }
    }
}

/// Request side of a hyper stream.
struct HyperWriter {
    chunks: UnboundedSender<Bytes>,
    budget: Arc<WriteBudget>,
    abort: Mutex<Option<AbortHandle>>,
    reset: AtomicBool,
}

impl HyperWriter {
    fn set_abort(&self, handle: AbortHandle) {
        if self.reset.load(Ordering::Acquire) {
            handle.abort();
            return;
        }
        *self.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

impl TransportWriter for HyperWriter {
    fn write(&self, data: Bytes) -> bool {
        let len = data.len();
        let full = self.budget.acquire(len);
        if self.chunks.unbounded_send(data).is_err() {
            // Stream is gone; nothing will ever drain this chunk.
            self.budget.release(len);
            return false;
        }
        full
    }

    fn write_queue_full(&self) -> bool {
        self.budget.is_full()
    }

    fn drain_handler(&self, handler: DrainHandler) {
        self.budget.set_drain_handler(handler);
    }

    fn end(&self) {
        self.chunks.close_channel();
    }

    fn reset(&self) {
        if self.reset.swap(true, Ordering::AcqRel) {
            return;
        }
        self.chunks.close_channel();
        // Dropping the in-flight request and response body makes hyper send
        // RST_STREAM(CANCEL).
        if let Some(handle) = self
            .abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Response side of a hyper stream: pauses the body pump.
#[derive(Default)]
struct ReadGate {
    paused: AtomicBool,
    notify: Notify,
}

impl ReadGate {
    async fn wait_resumed(&self) {
        while self.paused.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

impl TransportReader for ReadGate {
    fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            tracing::debug!("pausing response reads");
        }
    }

    fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            tracing::debug!("resuming response reads");
            self.notify.notify_one();
        }
    }
}

/// Where the TLS client config comes from.
enum TlsMode {
    /// Built from the enabled root certificate and provider features.
    Default,
    Custom(ClientConfig),
    /// Any server certificate is accepted.
    AcceptInvalidCerts,
}

impl TlsMode {
    fn into_config(self) -> Result<Option<ClientConfig>, ClientError> {
        match self {
            TlsMode::Default => Ok(None),
            TlsMode::Custom(config) => Ok(Some(config)),
            TlsMode::AcceptInvalidCerts => danger_accept_invalid_certs_config().map(Some),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            TlsMode::Default => "default",
            TlsMode::Custom(_) => "custom",
            TlsMode::AcceptInvalidCerts => "accept-invalid-certs",
        }
    }
}

/// HTTP/2 settings applied to every pooled connection. `None` keeps
/// hyper's default.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct H2Settings {
    stream_window: Option<u32>,
    connection_window: Option<u32>,
    keep_alive_interval: Option<Duration>,
    keep_alive_timeout: Option<Duration>,
}

impl H2Settings {
    fn apply(&self, builder: &mut hyper_util::client::legacy::Builder) {
        if let Some(size) = self.stream_window {
            builder.http2_initial_stream_window_size(size);
        }
        if let Some(size) = self.connection_window {
            builder.http2_initial_connection_window_size(size);
        }
        if let Some(interval) = self.keep_alive_interval {
            builder.http2_keep_alive_interval(interval);
        }
        if let Some(timeout) = self.keep_alive_timeout {
            builder.http2_keep_alive_timeout(timeout);
        }
    }
}

/// Builder for [`HyperTransport`]: TLS, HTTP/2 tuning, pooling and the
/// per-stream write budget.
///
/// # Example
///
/// ```ignore
/// use grpcwire_client::transport::HyperTransportBuilder;
/// use std::time::Duration;
///
/// let transport = HyperTransportBuilder::new()
///     .pool_idle_timeout(Duration::from_secs(90))
///     .h2_keep_alive_interval(Duration::from_secs(20))
///     .build()?;
/// ```
pub struct HyperTransportBuilder {
    tls: TlsMode,
    /// HTTP/2 prior knowledge; needed for plaintext (h2c) targets.
    http2_only: bool,
    pool_idle_timeout: Option<Duration>,
    pool_max_idle_per_host: usize,
    h2: H2Settings,
    /// Outbound bytes per stream before `write` reports a full buffer.
    write_buffer_limit: usize,
}

impl Default for HyperTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransportBuilder {
    pub fn new() -> Self {
        Self {
            tls: TlsMode::Default,
            http2_only: true,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
            h2: H2Settings::default(),
            write_buffer_limit: DEFAULT_WRITE_BUFFER_LIMIT,
        }
    }

    /// Use `config` for `https://` targets, e.g. for private roots or mTLS.
    ///
    /// The config should advertise `h2` in `alpn_protocols`.
    pub fn tls_config(mut self, config: ClientConfig) -> Self {
        self.tls = TlsMode::Custom(config);
        self
    }

    /// Use HTTP/2 prior knowledge. On by default; gRPC needs HTTP/2, and
    /// plaintext targets have no ALPN to negotiate it.
    pub fn http2_only(mut self, enabled: bool) -> Self {
        self.http2_only = enabled;
        self
    }

    /// Close pooled connections idle for longer than `timeout` (default 90s).
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = Some(timeout);
        self
    }

    /// Keep idle pooled connections indefinitely.
    pub fn pool_idle_timeout_none(mut self) -> Self {
        self.pool_idle_timeout = None;
        self
    }

    /// Cap idle pooled connections per host (default 32).
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    /// HTTP/2 stream window. Bounds how much response data the peer may
    /// send while a response is paused.
    pub fn h2_initial_stream_window_size(mut self, size: u32) -> Self {
        self.h2.stream_window = Some(size);
        self
    }

    pub fn h2_initial_connection_window_size(mut self, size: u32) -> Self {
        self.h2.connection_window = Some(size);
        self
    }

    /// Send HTTP/2 PINGs at this interval.
    pub fn h2_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.h2.keep_alive_interval = Some(interval);
        self
    }

    /// Drop the connection when a PING goes unanswered this long. Needs
    /// `h2_keep_alive_interval`.
    pub fn h2_keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.h2.keep_alive_timeout = Some(timeout);
        self
    }

    /// Request bytes that may wait for the HTTP/2 stack before a write
    /// reports the queue as full (default 64 KiB).
    pub fn write_buffer_limit(mut self, limit: usize) -> Self {
        self.write_buffer_limit = limit;
        self
    }

    /// Accept any server certificate.
    ///
    /// # Warning
    ///
    /// Only for development and testing.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.tls = TlsMode::AcceptInvalidCerts;
        self
    }

    pub fn build(self) -> Result<HyperTransport, ClientError> {
        let connector = build_https_connector(self.tls.into_config()?)?;

        let mut builder = Client::builder(TokioExecutor::new());
        // Pool expiry and h2 keep-alive both run on these timers.
        builder
            .pool_timer(TokioTimer::new())
            .timer(TokioTimer::new())
            .pool_idle_timeout(self.pool_idle_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .http2_only(self.http2_only);
        self.h2.apply(&mut builder);

        Ok(HyperTransport {
            client: builder.build(connector),
            write_buffer_limit: self.write_buffer_limit,
        })
    }
}

impl std::fmt::Debug for HyperTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransportBuilder")
            .field("tls", &self.tls.name())
            .field("http2_only", &self.http2_only)
            .field("pool_idle_timeout", &self.pool_idle_timeout)
            .field("pool_max_idle_per_host", &self.pool_max_idle_per_host)
            .field("h2", &self.h2)
            .field("write_buffer_limit", &self.write_buffer_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = HyperTransportBuilder::new();
        assert!(builder.http2_only);
        assert_eq!(builder.pool_max_idle_per_host, 32);
        assert!(builder.pool_idle_timeout.is_some());
        assert_eq!(builder.write_buffer_limit, DEFAULT_WRITE_BUFFER_LIMIT);
    }

    #[test]
    fn test_builder_pool_settings() {
        let builder = HyperTransportBuilder::new()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10);
        assert_eq!(builder.pool_idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(builder.pool_max_idle_per_host, 10);

        let builder = builder.pool_idle_timeout_none();
        assert!(builder.pool_idle_timeout.is_none());
    }

    #[test]
    fn test_builder_h2_settings() {
        let builder = HyperTransportBuilder::new()
            .http2_only(false)
            .h2_initial_stream_window_size(1024 * 1024)
            .h2_initial_connection_window_size(2 * 1024 * 1024)
            .h2_keep_alive_interval(Duration::from_secs(10))
            .h2_keep_alive_timeout(Duration::from_secs(5))
            .write_buffer_limit(4096);

        assert!(!builder.http2_only);
        assert_eq!(
            builder.h2,
            H2Settings {
                stream_window: Some(1024 * 1024),
                connection_window: Some(2 * 1024 * 1024),
                keep_alive_interval: Some(Duration::from_secs(10)),
                keep_alive_timeout: Some(Duration::from_secs(5)),
            }
        );
        assert_eq!(builder.write_buffer_limit, 4096);
    }

    #[test]
    fn test_builder_tls_mode() {
        let builder = HyperTransportBuilder::new();
        assert_eq!(builder.tls.name(), "default");
        let builder = builder.danger_accept_invalid_certs();
        assert!(format!("{builder:?}").contains("accept-invalid-certs"));
    }

    #[cfg(all(
        any(feature = "tls-ring", feature = "tls-aws-lc"),
        any(feature = "tls-native-roots", feature = "tls-webpki-roots")
    ))]
    #[test]
    fn test_build_transport() {
        let transport = HyperTransportBuilder::new().write_buffer_limit(1024).build().unwrap();
        assert_eq!(transport.write_buffer_limit(), 1024);
    }

    #[tokio::test]
    async fn test_read_gate_pause_resume() {
        let gate = Arc::new(ReadGate::default());
        gate.wait_resumed().await;

        gate.pause();
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_resumed().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        gate.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("gate should open")
            .unwrap();
    }
}
