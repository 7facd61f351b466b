//! Request body type for the hyper transport.
//!
//! [`RequestBody`] is fed by a channel of already-framed chunks. Every chunk
//! counts against a shared [`WriteBudget`] until hyper pulls it, which is
//! how the request stream learns that its outbound buffer is full or drained.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use futures::channel::mpsc::UnboundedReceiver;
use grpcwire_core::DrainHandler;
use http_body::{Body, Frame};
use pin_project_lite::pin_project;

use crate::ClientError;

/// Bytes written but not yet taken by the HTTP/2 stack.
pub(crate) struct WriteBudget {
    in_flight: AtomicUsize,
    limit: usize,
    saturated: AtomicBool,
    drain: Mutex<Option<DrainHandler>>,
}

impl WriteBudget {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            limit: limit.max(1),
            saturated: AtomicBool::new(false),
            drain: Mutex::new(None),
        }
    }

    /// Account for a queued chunk. Returns `true` when over the limit.
    pub(crate) fn acquire(&self, len: usize) -> bool {
        let now = self.in_flight.fetch_add(len, Ordering::AcqRel) + len;
        let full = now >= self.limit;
        if full {
            self.saturated.store(true, Ordering::Release);
        }
        full
    }

    /// Account for a chunk handed to hyper, running the drain handler when a
    /// saturated buffer drops back under the limit.
    pub(crate) fn release(&self, len: usize) {
        let now = self.in_flight.fetch_sub(len, Ordering::AcqRel) - len;
        if now < self.limit && self.saturated.swap(false, Ordering::AcqRel) {
            let handler = self
                .drain
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(mut handler) = handler {
                handler();
                let mut slot = self.drain.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(handler);
                }
            }
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) >= self.limit
    }

    pub(crate) fn set_drain_handler(&self, handler: DrainHandler) {
        *self.drain.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

pin_project! {
    /// A streaming gRPC request body.
    ///
    /// Ends when the sending half of its channel is closed, which is how the
    /// request side half-closes the stream.
    pub struct RequestBody {
        #[pin]
        chunks: UnboundedReceiver<Bytes>,
        budget: Arc<WriteBudget>,
        done: bool,
    }
}

impl RequestBody {
    pub(crate) fn new(chunks: UnboundedReceiver<Bytes>, budget: Arc<WriteBudget>) -> Self {
        Self {
            chunks,
            budget,
            done: false,
        }
    }
}

impl Body for RequestBody {
    type Data = Bytes;
    type Error = ClientError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if *this.done {
            return Poll::Ready(None);
        }
        match this.chunks.poll_next(cx) {
            Poll::Ready(Some(data)) => {
                this.budget.release(data.len());
                Poll::Ready(Some(Ok(Frame::data(data))))
            }
            Poll::Ready(None) => {
                *this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody")
            .field("in_flight", &self.budget.in_flight.load(Ordering::Relaxed))
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_body_yields_chunks_until_closed() {
        let (tx, rx) = mpsc::unbounded();
        let budget = Arc::new(WriteBudget::new(1024));
        let mut body = RequestBody::new(rx, budget.clone());

        for chunk in ["chunk1", "chunk2", "chunk3"] {
            budget.acquire(chunk.len());
            tx.unbounded_send(Bytes::from(chunk)).unwrap();
        }
        tx.close_channel();

        let collected = Pin::new(&mut body).collect().await.unwrap();
        assert_eq!(collected.to_bytes(), Bytes::from("chunk1chunk2chunk3"));
        assert!(body.is_end_stream());
        assert!(!budget.is_full());
    }

    #[tokio::test]
    async fn test_drain_runs_when_budget_frees() {
        let (tx, rx) = mpsc::unbounded();
        let budget = Arc::new(WriteBudget::new(8));
        let drained = Arc::new(AtomicUsize::new(0));
        let counter = drained.clone();
        budget.set_drain_handler(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!budget.acquire(4));
        tx.unbounded_send(Bytes::from_static(b"abcd")).unwrap();
        assert!(budget.acquire(4));
        tx.unbounded_send(Bytes::from_static(b"efgh")).unwrap();
        assert!(budget.is_full());

        let mut body = RequestBody::new(rx, budget.clone());
        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(drained.load(Ordering::SeqCst), 1);

        // Not saturated anymore, so the second release does not fire again.
        body.frame().await.unwrap().unwrap();
        assert_eq!(drained.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_budget_under_limit_never_drains() {
        let budget = WriteBudget::new(100);
        let drained = Arc::new(AtomicUsize::new(0));
        let counter = drained.clone();
        budget.set_drain_handler(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(!budget.acquire(10));
        budget.release(10);
        assert_eq!(drained.load(Ordering::SeqCst), 0);
    }
}
