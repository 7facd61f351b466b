//! The response side of a call.
//!
//! [`ClientResponseStream`] turns transport events (head, body chunks,
//! trailers, end, failure) into an ordered, flow-controlled sequence of
//! messages followed by exactly one terminal [`Status`].
//!
//! States:
//!
//! ```text
//! WaitingHeaders --head--> Receiving --end/trailers/failure--> Ended
//!        \________________ reset / deadline ________________/
//! ```
//!
//! The terminal status is queued behind the messages still buffered, so the
//! end handler only runs once every message was delivered.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use grpcwire_core::{
    CompressionRegistry, FlowControlledQueue, FrameDecoder, GRPC_ENCODING, GrpcMessage, IDENTITY,
    Status,
};
use http::{HeaderMap, StatusCode, header};
use tokio::sync::oneshot;

use crate::metadata::Metadata;
use crate::status::{http_status_to_code, status_from_metadata, status_from_trailers};
use crate::transport::TransportReader;

type MessageHandler = Box<dyn FnMut(GrpcMessage) + Send>;
type EndHandler = Box<dyn FnOnce(&Status) + Send>;

/// Lifecycle state of a [`ClientResponseStream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseState {
    WaitingHeaders,
    Receiving,
    Ended,
}

/// Settings a response stream is created with.
#[derive(Clone, Debug)]
pub(crate) struct ResponseConfig {
    pub registry: CompressionRegistry,
    pub max_message_size: usize,
    pub high_water_mark: usize,
}

enum Delivery {
    Message(GrpcMessage),
    End,
}

struct Inner {
    state: ResponseState,
    headers: Metadata,
    trailers: Option<Metadata>,
    /// Resolved terminal status, set when `End` is queued.
    resolved: Option<Status>,
    /// Status exposed to the application, set when `End` is delivered.
    status: Option<Status>,
    /// Status carried by a trailers-only head, applied at end of stream.
    trailers_only: Option<Status>,
    encoding: &'static str,
    registry: CompressionRegistry,
    decoder: FrameDecoder,
    queue: FlowControlledQueue<Delivery>,
    message_handler: Option<MessageHandler>,
    end_handler: Option<EndHandler>,
    end_waiters: Vec<oneshot::Sender<Status>>,
    reader: Option<Arc<dyn TransportReader>>,
    delivering: bool,
}

impl Inner {
    fn is_terminated(&self) -> bool {
        self.resolved.is_some()
    }

    /// Queue the terminal status behind any buffered messages.
    fn finish(&mut self, status: Status) {
        if self.is_terminated() {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(code = %status.code(), buffered = self.queue.len(), "response finished");
        self.resolved = Some(status);
        self.queue.write(Delivery::End);
    }
}

/// Flow-controlled response of a call: headers, messages, trailers, status.
///
/// Cheap to clone; clones share the same stream. Messages received before a
/// [`message_handler`](Self::message_handler) is registered are buffered, as
/// are messages received while paused.
///
/// # Example
///
/// ```ignore
/// let response = request.response().await?;
/// response.message_handler(|msg| println!("{:?}", msg.payload()));
/// response.end_handler(|status| println!("done: {status}"));
/// ```
#[derive(Clone)]
pub struct ClientResponseStream {
    inner: Arc<Mutex<Inner>>,
}

impl ClientResponseStream {
    pub(crate) fn new(config: ResponseConfig) -> Self {
        let decoder = FrameDecoder::new(None).with_max_message_size(config.max_message_size);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ResponseState::WaitingHeaders,
                headers: Metadata::empty(),
                trailers: None,
                resolved: None,
                status: None,
                trailers_only: None,
                encoding: IDENTITY,
                registry: config.registry,
                decoder,
                queue: FlowControlledQueue::with_high_water_mark(config.high_water_mark),
                message_handler: None,
                end_handler: None,
                end_waiters: Vec::new(),
                reader: None,
                delivering: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ResponseState {
        self.lock().state
    }

    /// Register the callback for incoming messages, replacing any previous
    /// one. Buffered messages are delivered right away (demand permitting).
    pub fn message_handler<F>(&self, handler: F)
    where
        F: FnMut(GrpcMessage) + Send + 'static,
    {
        self.lock().message_handler = Some(Box::new(handler));
        self.deliver();
    }

    /// Register the callback for the terminal status.
    ///
    /// Runs exactly once, after every buffered message was delivered. If the
    /// stream has already ended it runs immediately.
    pub fn end_handler<F>(&self, handler: F)
    where
        F: FnOnce(&Status) + Send + 'static,
    {
        let status = {
            let mut inner = self.lock();
            match inner.status.clone() {
                Some(status) => status,
                None => {
                    inner.end_handler = Some(Box::new(handler));
                    return;
                }
            }
        };
        handler(&status);
    }

    /// Stop message delivery. Buffered and incoming messages are kept.
    pub fn pause(&self) {
        self.lock().queue.pause();
    }

    /// Deliver messages as they arrive.
    pub fn resume(&self) {
        self.lock().queue.resume();
        self.deliver();
    }

    /// Deliver `n` more messages while paused.
    pub fn fetch(&self, n: u64) {
        self.lock().queue.fetch(n);
        self.deliver();
    }

    /// The terminal status, available once the end handler has run.
    pub fn status(&self) -> Option<Status> {
        self.lock().status.clone()
    }

    /// Response headers. For a trailers-only response these are the trailers.
    pub fn headers(&self) -> Metadata {
        self.lock().headers.clone()
    }

    /// Response trailers, once received.
    pub fn trailers(&self) -> Option<Metadata> {
        self.lock().trailers.clone()
    }

    /// Encoding the peer compresses messages with.
    pub fn encoding(&self) -> &'static str {
        self.lock().encoding
    }

    /// Resolves to the terminal status once the stream has ended.
    pub fn finished(&self) -> impl Future<Output = Status> + Send + 'static {
        let waiter = {
            let mut inner = self.lock();
            match inner.status.clone() {
                Some(status) => Err(status),
                None => {
                    let (tx, rx) = oneshot::channel();
                    inner.end_waiters.push(tx);
                    Ok(rx)
                }
            }
        };
        async move {
            match waiter {
                Err(status) => status,
                Ok(rx) => rx
                    .await
                    .unwrap_or_else(|_| Status::cancelled("response stream dropped")),
            }
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.lock().is_terminated()
    }

    pub(crate) fn on_headers(
        &self,
        status: StatusCode,
        headers: HeaderMap,
        reader: Arc<dyn TransportReader>,
    ) {
        {
            let mut inner = self.lock();
            if inner.state != ResponseState::WaitingHeaders || inner.is_terminated() {
                return;
            }
            inner.state = ResponseState::Receiving;
            inner.reader = Some(reader);

            #[cfg(feature = "tracing")]
            tracing::debug!(http.status = status.as_u16(), "response headers");

            // A head carrying grpc-status is a trailers-only response.
            if let Some(grpc_status) = status_from_metadata(&headers) {
                let metadata = Metadata::new(headers);
                inner.trailers = Some(metadata.clone());
                inner.headers = metadata;
                inner.trailers_only = Some(grpc_status);
                return;
            }

            let content_type = headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let encoding = headers
                .get(GRPC_ENCODING)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            inner.headers = Metadata::new(headers);

            if status != StatusCode::OK {
                let code = http_status_to_code(status);
                inner.finish(Status::new(
                    code,
                    format!("unexpected HTTP status code received from server: {status}"),
                ));
            } else if !is_grpc_content_type(&content_type) {
                inner.finish(Status::unknown(format!(
                    "invalid content-type: {content_type:?}"
                )));
            } else {
                match inner.registry.resolve(&encoding) {
                    Ok(codec) => {
                        inner.encoding = codec.name();
                        inner.decoder.set_codec(Some(codec));
                    }
                    Err(e) => inner.finish(e.to_status()),
                }
            }
        }
        self.deliver();
    }

    pub(crate) fn on_data(&self, chunk: Bytes) {
        let reader = {
            let mut inner = self.lock();
            if inner.state != ResponseState::Receiving || inner.is_terminated() {
                return;
            }
            inner.decoder.push(&chunk);
            let mut backpressure = false;
            loop {
                match inner.decoder.decode_next() {
                    Ok(Some(message)) => {
                        if !inner.queue.write(Delivery::Message(message)) {
                            backpressure = true;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        inner.finish(e.to_status());
                        break;
                    }
                }
            }
            if backpressure && !inner.is_terminated() {
                inner.reader.clone()
            } else {
                None
            }
        };
        if let Some(reader) = reader {
            reader.pause();
        }
        self.deliver();
    }

    pub(crate) fn on_trailers(&self, trailers: HeaderMap) {
        {
            let mut inner = self.lock();
            if inner.is_terminated() {
                return;
            }
            let status = match inner.decoder.finish() {
                Err(e) => e.to_status(),
                Ok(()) => status_from_trailers(&trailers),
            };
            #[cfg(feature = "tracing")]
            tracing::debug!(code = %status.code(), "response trailers");
            inner.trailers = Some(Metadata::new(trailers));
            inner.finish(status);
        }
        self.deliver();
    }

    pub(crate) fn on_end(&self) {
        {
            let mut inner = self.lock();
            if inner.is_terminated() {
                return;
            }
            let status = match (inner.decoder.finish(), inner.trailers_only.take()) {
                (Err(e), _) => e.to_status(),
                (Ok(()), Some(status)) => status,
                (Ok(()), None) => Status::internal("stream ended without trailers"),
            };
            inner.finish(status);
        }
        self.deliver();
    }

    pub(crate) fn on_failure(&self, status: Status) {
        {
            let mut inner = self.lock();
            if inner.is_terminated() {
                return;
            }
            let status = inner.trailers_only.take().unwrap_or(status);
            inner.finish(status);
        }
        self.deliver();
    }

    /// End the stream locally: buffered messages are dropped and the end
    /// handler runs with `status`. A stream whose terminal status was already
    /// received keeps it.
    pub(crate) fn cancel(&self, status: Status) {
        {
            let mut inner = self.lock();
            if inner.status.is_some() {
                return;
            }
            let dropped = inner.queue.clear();
            #[cfg(feature = "tracing")]
            tracing::debug!(code = %status.code(), dropped, "response cancelled");
            #[cfg(not(feature = "tracing"))]
            let _ = dropped;
            match inner.resolved.clone() {
                Some(_) => {
                    inner.queue.write(Delivery::End);
                }
                None => inner.finish(status),
            }
        }
        self.deliver();
    }

    /// Drain the queue into the handlers.
    ///
    /// Handlers run without the lock held, so they may call back into the
    /// stream (pause, fetch, or a reset of the request). Reentrant calls
    /// return immediately and the outer loop picks up their effects.
    fn deliver(&self) {
        {
            let mut inner = self.lock();
            if inner.delivering {
                return;
            }
            inner.delivering = true;
        }

        loop {
            let mut inner = self.lock();
            let at_end = inner
                .queue
                .front()
                .map(|next| matches!(next, Delivery::End));
            let next = match at_end {
                Some(true) => inner.queue.poll_unmetered(),
                Some(false) if inner.message_handler.is_some() => inner.queue.poll(),
                _ => None,
            };
            // Resumed after unlocking: a reader may push data from `resume`.
            let drained = if inner.queue.take_drained() {
                inner.reader.clone()
            } else {
                None
            };

            match next {
                None => {
                    inner.delivering = false;
                    return;
                }
                Some(Delivery::Message(message)) => {
                    let Some(mut handler) = inner.message_handler.take() else {
                        inner.delivering = false;
                        return;
                    };
                    drop(inner);
                    if let Some(reader) = drained {
                        reader.resume();
                    }
                    handler(message);
                    let mut inner = self.lock();
                    if inner.message_handler.is_none() {
                        inner.message_handler = Some(handler);
                    }
                }
                Some(Delivery::End) => {
                    let status = inner
                        .resolved
                        .clone()
                        .unwrap_or_else(|| Status::internal("stream ended without status"));
                    inner.state = ResponseState::Ended;
                    inner.status = Some(status.clone());
                    inner.message_handler = None;
                    inner.reader = None;
                    let end_handler = inner.end_handler.take();
                    let waiters = std::mem::take(&mut inner.end_waiters);
                    drop(inner);

                    if let Some(handler) = end_handler {
                        handler(&status);
                    }
                    for waiter in waiters {
                        let _ = waiter.send(status.clone());
                    }
                }
            }
        }
    }
}

fn is_grpc_content_type(value: &str) -> bool {
    value == "application/grpc"
        || value
            .strip_prefix("application/grpc")
            .is_some_and(|rest| rest.starts_with('+') || rest.starts_with(';'))
}

impl std::fmt::Debug for ClientResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ClientResponseStream")
            .field("state", &inner.state)
            .field("encoding", &inner.encoding)
            .field("queue", &inner.queue)
            .field("status", &inner.status)
            .finish_non_exhaustive()
    }
}
