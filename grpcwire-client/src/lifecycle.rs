//! Lifecycle glue between a transport and the call it serves.
//!
//! Opening a call creates the response stream up front (waiting for
//! headers) together with a one-shot deferred that resolves to it once the
//! response head arrives. Transports only ever see the [`ResponseSink`];
//! applications only ever see the [`ResponseFuture`] and what it yields.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use grpcwire_core::Status;
use http::{HeaderMap, StatusCode};
use tokio::sync::oneshot;

use crate::ClientError;
use crate::response::ClientResponseStream;
use crate::transport::TransportReader;

type Deferred = oneshot::Sender<Result<ClientResponseStream, ClientError>>;

/// Where a transport reports everything that happens on a stream.
///
/// Cheap to clone. Events after the stream has ended are ignored, so a
/// transport does not need to track whether the call was reset locally.
#[derive(Clone)]
pub struct ResponseSink {
    response: ClientResponseStream,
    deferred: Arc<Mutex<Option<Deferred>>>,
}

impl ResponseSink {
    pub(crate) fn new(response: ClientResponseStream) -> (Self, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        let sink = Self {
            response,
            deferred: Arc::new(Mutex::new(Some(tx))),
        };
        (sink, ResponseFuture::new(rx))
    }

    /// The response head arrived.
    pub fn headers(&self, status: StatusCode, headers: HeaderMap, reader: Arc<dyn TransportReader>) {
        self.response.on_headers(status, headers, reader);
        self.resolve(Ok(self.response.clone()));
    }

    /// A chunk of response body arrived.
    pub fn data(&self, chunk: Bytes) {
        self.response.on_data(chunk);
    }

    /// The trailer block arrived.
    pub fn trailers(&self, trailers: HeaderMap) {
        self.response.on_trailers(trailers);
    }

    /// The peer ended the stream cleanly.
    pub fn end(&self) {
        if self.is_pending() {
            self.fail(ClientError::Transport(
                "stream closed before response headers".into(),
            ));
            return;
        }
        self.response.on_end();
    }

    /// The stream failed (connection refused, reset by peer, ...).
    ///
    /// Before the response head this fails the deferred response. Afterwards
    /// the response stream ends with `UNAVAILABLE` unless it already had a
    /// terminal status.
    pub fn fail(&self, error: ClientError) {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %error, "stream failed");
        self.resolve(Err(error.clone()));
        self.response.on_failure(Status::unavailable(error.to_string()));
    }

    /// End the call locally with `status`, as for a reset or an expired
    /// deadline.
    pub(crate) fn cancel(&self, status: Status) {
        self.resolve(Err(ClientError::Status(status.clone())));
        self.response.cancel(status);
    }

    /// Whether the response already has its terminal status.
    pub(crate) fn is_finished(&self) -> bool {
        self.response.is_terminated()
    }

    pub(crate) fn response(&self) -> &ClientResponseStream {
        &self.response
    }

    fn is_pending(&self) -> bool {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn resolve(&self, result: Result<ClientResponseStream, ClientError>) {
        let deferred = self
            .deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = deferred {
            let _ = tx.send(result);
        }
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSink")
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}

/// Resolves to the response stream once its headers arrive.
///
/// Cloneable; every clone yields the same outcome. Fails if the connection
/// could not be established, or if the call was reset or timed out before
/// the response head.
#[derive(Clone)]
pub struct ResponseFuture {
    inner: Shared<BoxFuture<'static, Result<ClientResponseStream, ClientError>>>,
}

impl ResponseFuture {
    fn new(rx: oneshot::Receiver<Result<ClientResponseStream, ClientError>>) -> Self {
        let inner = rx
            .map(|result| {
                result.unwrap_or_else(|_| {
                    Err(ClientError::Transport(
                        "stream dropped before response headers".into(),
                    ))
                })
            })
            .boxed()
            .shared();
        Self { inner }
    }
}

impl Future for ResponseFuture {
    type Output = Result<ClientResponseStream, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture").finish_non_exhaustive()
    }
}
