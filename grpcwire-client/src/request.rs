//! The request side of a call.
//!
//! [`ClientRequestStream`] owns the request head until it is sent, frames
//! outgoing messages, and controls how the stream ends:
//!
//! ```text
//! Idle --send_headers/write--> Active --end--> Ended
//!   \                             \              \
//!    `------------------------------`--reset------`--> Reset
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use grpcwire_core::{
    BoxedCodec, CompressionRegistry, DrainHandler, GRPC_ACCEPT_ENCODING, GRPC_ENCODING,
    GrpcMessage, Status,
};
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri, Version};

use crate::ClientError;
use crate::lifecycle::{ResponseFuture, ResponseSink};
use crate::metadata::Metadata;
use crate::options::{GRPC_TIMEOUT, duration_to_timeout_header};
use crate::transport::{Transport, TransportWriter};

/// Lifecycle state of a [`ClientRequestStream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Headers not sent yet; metadata and encoding may still change.
    Idle,
    /// Headers sent; messages may be written.
    Active,
    /// Request side half-closed.
    Ended,
    /// Stream aborted locally.
    Reset,
}

/// Everything a request stream is opened with.
pub(crate) struct RequestParts {
    pub transport: Arc<dyn Transport>,
    pub uri: Uri,
    pub metadata: Metadata,
    pub codec: BoxedCodec,
    pub registry: CompressionRegistry,
    pub timeout: Option<Duration>,
    pub user_agent: HeaderValue,
    pub sink: ResponseSink,
    pub response: ResponseFuture,
    #[cfg(feature = "tracing")]
    pub span: tracing::Span,
}

/// Writable side of a call.
///
/// Headers go out on [`send_headers`](Self::send_headers) or implicitly with
/// the first [`write`](Self::write) or [`end`](Self::end). The response is
/// available through [`response`](Self::response) at any time.
///
/// # Example
///
/// ```ignore
/// let mut request = client.request("echo.Echo/Chat")?;
/// let response = request.response();
/// request.write(GrpcMessage::from("hello"))?;
/// request.end()?;
/// let response = response.await?;
/// ```
pub struct ClientRequestStream {
    state: RequestState,
    parts: RequestParts,
    message_compression: bool,
    control: Arc<StreamControl>,
    pending_drain: Option<DrainHandler>,
}

/// State shared between a request stream and its [`ResetHandle`]s.
struct StreamControl {
    sink: ResponseSink,
    writer: OnceLock<Arc<dyn TransportWriter>>,
    reset: AtomicBool,
}

impl StreamControl {
    /// Abort the stream once; later calls do nothing.
    fn abort(&self, status: Status) {
        if self.reset.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(writer) = self.writer.get() {
            writer.reset();
        }
        self.sink.cancel(status);
    }

    fn is_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }
}

/// Cloneable handle that resets a call, e.g. from inside a response
/// handler.
#[derive(Clone)]
pub struct ResetHandle {
    control: Arc<StreamControl>,
}

impl ResetHandle {
    /// Same as [`ClientRequestStream::reset`].
    pub fn reset(&self) {
        self.control
            .abort(Status::cancelled("stream reset by client"));
    }

    pub fn is_reset(&self) -> bool {
        self.control.is_reset()
    }
}

impl std::fmt::Debug for ResetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetHandle")
            .field("reset", &self.is_reset())
            .finish()
    }
}

impl ClientRequestStream {
    pub(crate) fn new(parts: RequestParts) -> Self {
        let control = Arc::new(StreamControl {
            sink: parts.sink.clone(),
            writer: OnceLock::new(),
            reset: AtomicBool::new(false),
        });
        Self {
            state: RequestState::Idle,
            parts,
            message_compression: true,
            control,
            pending_drain: None,
        }
    }

    pub fn state(&self) -> RequestState {
        if self.control.is_reset() {
            RequestState::Reset
        } else {
            self.state
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    /// Request metadata.
    pub fn headers(&self) -> &Metadata {
        &self.parts.metadata
    }

    /// Mutable request metadata. Fails once the headers were sent.
    pub fn headers_mut(&mut self) -> Result<&mut Metadata, ClientError> {
        if self.state() != RequestState::Idle {
            return Err(ClientError::IllegalState("headers already sent"));
        }
        Ok(&mut self.parts.metadata)
    }

    /// Choose the encoding for outgoing messages. Must be registered with the
    /// client and set before the headers are sent.
    pub fn set_encoding(&mut self, name: &str) -> Result<(), ClientError> {
        if self.state() != RequestState::Idle {
            return Err(ClientError::IllegalState("headers already sent"));
        }
        self.parts.codec = self.parts.registry.resolve(name)?;
        Ok(())
    }

    /// Encoding announced in `grpc-encoding`.
    pub fn encoding(&self) -> &'static str {
        self.parts.codec.name()
    }

    /// Turn per-message compression off (or back on). Messages written
    /// while off are sent uncompressed even if an encoding was negotiated.
    pub fn set_message_compression(&mut self, enabled: bool) {
        self.message_compression = enabled;
    }

    /// Send the request head. Fails unless the stream is idle.
    pub fn send_headers(&mut self) -> Result<(), ClientError> {
        match self.state() {
            RequestState::Idle => {}
            RequestState::Reset => return Err(ClientError::IllegalState("stream was reset")),
            _ => return Err(ClientError::IllegalState("headers already sent")),
        }
        let head = self.build_head()?;

        #[cfg(feature = "tracing")]
        let _entered = self.parts.span.enter();
        #[cfg(feature = "tracing")]
        tracing::debug!(uri = %self.parts.uri, "sending request headers");

        let writer = self.parts.transport.open(head, self.parts.sink.clone());
        if let Some(handler) = self.pending_drain.take() {
            writer.drain_handler(handler);
        }
        // A reset that raced with `open` has to reach the new writer too.
        let _ = self.control.writer.set(writer.clone());
        if self.control.is_reset() {
            writer.reset();
        }
        if let Some(timeout) = self.parts.timeout {
            self.spawn_deadline(timeout);
        }
        self.state = RequestState::Active;
        Ok(())
    }

    /// Frame and send one message, sending the headers first if needed.
    ///
    /// Returns whether the outbound buffer is now full; when it is, wait for
    /// the [`drain_handler`](Self::drain_handler) before writing more.
    pub fn write(&mut self, message: GrpcMessage) -> Result<bool, ClientError> {
        match self.state() {
            RequestState::Idle => self.send_headers()?,
            RequestState::Active => {}
            RequestState::Ended | RequestState::Reset => {
                return Err(ClientError::IllegalState("write after end or reset"));
            }
        }
        let frame = if self.message_compression {
            message.encode(&self.parts.codec)?
        } else {
            message.encode(&BoxedCodec::identity())?
        };
        Ok(self.writer().is_some_and(|w| w.write(frame)))
    }

    /// Half-close the request side, sending the headers first if needed.
    pub fn end(&mut self) -> Result<(), ClientError> {
        match self.state() {
            RequestState::Idle => self.send_headers()?,
            RequestState::Active => {}
            RequestState::Ended | RequestState::Reset => {
                return Err(ClientError::IllegalState("end after end or reset"));
            }
        }
        if let Some(writer) = self.writer() {
            writer.end();
        }
        self.state = RequestState::Ended;
        Ok(())
    }

    /// Write a final message and half-close.
    pub fn end_with(&mut self, message: GrpcMessage) -> Result<(), ClientError> {
        self.write(message)?;
        self.end()
    }

    /// Abort the call. The response ends with `CANCELLED`, dropping any
    /// message not yet delivered. Calling it again has no effect.
    pub fn reset(&mut self) {
        #[cfg(feature = "tracing")]
        if !self.control.is_reset() {
            tracing::debug!(parent: &self.parts.span, state = ?self.state, "resetting stream");
        }
        self.reset_handle().reset();
    }

    /// A handle that can reset this call from elsewhere.
    pub fn reset_handle(&self) -> ResetHandle {
        ResetHandle {
            control: self.control.clone(),
        }
    }

    /// Whether the outbound buffer is over its limit.
    pub fn write_queue_full(&self) -> bool {
        self.writer().is_some_and(|w| w.write_queue_full())
    }

    /// Register the callback run when a full outbound buffer drains.
    pub fn drain_handler<F>(&mut self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        match self.writer() {
            Some(writer) => writer.drain_handler(Box::new(handler)),
            None => self.pending_drain = Some(Box::new(handler)),
        }
    }

    /// The response, once its headers arrive.
    pub fn response(&self) -> ResponseFuture {
        self.parts.response.clone()
    }

    fn writer(&self) -> Option<&Arc<dyn TransportWriter>> {
        self.control.writer.get()
    }

    fn build_head(&self) -> Result<http::request::Parts, ClientError> {
        let mut headers = HeaderMap::with_capacity(self.parts.metadata.len() + 6);
        for (name, value) in self.parts.metadata.iter() {
            if !is_reserved_header(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/grpc"),
        );
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert(header::USER_AGENT, self.parts.user_agent.clone());
        headers.insert(
            GRPC_ACCEPT_ENCODING,
            header_value(&self.parts.registry.accept_encoding())?,
        );
        if !self.parts.codec.is_identity() {
            headers.insert(GRPC_ENCODING, header_value(self.parts.codec.name())?);
        }
        if let Some(timeout) = self.parts.timeout {
            headers.insert(
                GRPC_TIMEOUT,
                header_value(&duration_to_timeout_header(timeout))?,
            );
        }

        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri(self.parts.uri.clone())
            .version(Version::HTTP_2)
            .body(())?;
        *request.headers_mut() = headers;
        let (head, ()) = request.into_parts();
        Ok(head)
    }

    /// Reset the stream with `DEADLINE_EXCEEDED` if it outlives `timeout`.
    ///
    /// Needs a tokio runtime; without one the deadline is only advertised to
    /// the server.
    fn spawn_deadline(&self, timeout: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let control = self.control.clone();
        let finished = control.sink.response().finished();
        runtime.spawn(async move {
            tokio::select! {
                _ = finished => {}
                _ = tokio::time::sleep(timeout) => {
                    if !control.sink.is_finished() {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?timeout, "deadline exceeded");
                        control.abort(Status::deadline_exceeded(format!(
                            "deadline of {timeout:?} exceeded"
                        )));
                    }
                }
            }
        });
    }
}

/// Headers the protocol owns. Application metadata under these names is
/// dropped rather than sent.
fn is_reserved_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("grpc-") || name == "content-type" || name == "te" || name == "content-length"
}

fn header_value(value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value).map_err(|e| ClientError::InvalidMetadata(e.to_string()))
}

impl std::fmt::Debug for ClientRequestStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRequestStream")
            .field("state", &self.state())
            .field("uri", &self.parts.uri)
            .field("encoding", &self.encoding())
            .field("message_compression", &self.message_compression)
            .finish_non_exhaustive()
    }
}
