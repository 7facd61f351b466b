//! In-memory transport for driving calls from tests.
//!
//! Every opened stream is recorded. A test plays the server through the
//! recorded [`MockStream`]: it inspects what the client wrote and feeds
//! response events into the stream's sink.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use grpcwire_client::grpcwire_core::{DrainHandler, FrameDecoder, encode_frame};
use grpcwire_client::transport::{ResponseSink, Transport, TransportReader, TransportWriter};
use grpcwire_client::{ClientBuilder, ClientError, Code, GrpcClient, encode_grpc_message};
use http::{HeaderMap, HeaderValue, StatusCode, Uri};

#[derive(Clone, Default)]
pub struct MockTransport {
    streams: Arc<Mutex<Vec<MockStream>>>,
    refuse: Option<&'static str>,
    write_limit: Option<usize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stream fails before response headers with `reason`.
    pub fn refusing(reason: &'static str) -> Self {
        Self {
            refuse: Some(reason),
            ..Self::default()
        }
    }

    /// Report the outbound buffer full once `frames` writes are unflushed.
    pub fn with_write_limit(frames: usize) -> Self {
        Self {
            write_limit: Some(frames),
            ..Self::default()
        }
    }

    pub fn builder(&self) -> ClientBuilder {
        ClientBuilder::new("http://localhost:50051").transport(self.clone())
    }

    pub fn client(&self) -> GrpcClient {
        self.builder().build().expect("client")
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn try_stream(&self, index: usize) -> Option<MockStream> {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index)
            .cloned()
    }

    /// Wait until stream `index` is opened, letting spawned calls run.
    pub async fn stream(&self, index: usize) -> MockStream {
        for _ in 0..1000 {
            if let Some(stream) = self.try_stream(index) {
                return stream;
            }
            tokio::task::yield_now().await;
        }
        panic!("stream {index} was never opened");
    }
}

impl Transport for MockTransport {
    fn open(&self, head: http::request::Parts, sink: ResponseSink) -> Arc<dyn TransportWriter> {
        let writer = Arc::new(MockWriter {
            limit: self.write_limit.unwrap_or(usize::MAX),
            ..MockWriter::default()
        });
        let stream = MockStream {
            method: head.method.to_string(),
            uri: head.uri,
            headers: head.headers,
            sink: sink.clone(),
            writer: writer.clone(),
            reader: Arc::new(MockReader::default()),
        };
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stream);
        if let Some(reason) = self.refuse {
            sink.fail(ClientError::Transport(reason.to_string()));
        }
        writer
    }
}

/// One recorded stream.
#[derive(Clone)]
pub struct MockStream {
    pub method: String,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub sink: ResponseSink,
    pub writer: Arc<MockWriter>,
    pub reader: Arc<MockReader>,
}

impl MockStream {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Send a `200 application/grpc` response head.
    pub fn respond(&self) {
        self.respond_with(StatusCode::OK, grpc_headers());
    }

    pub fn respond_with(&self, status: StatusCode, headers: HeaderMap) {
        self.sink.headers(status, headers, self.reader.clone());
    }

    /// Send one uncompressed message.
    pub fn send(&self, payload: &[u8]) {
        self.sink.data(encode_frame(payload, false));
    }

    /// Send the trailers and end the stream.
    pub fn finish(&self, code: Code, message: Option<&str>) {
        self.sink.trailers(status_headers(code, message));
        self.sink.end();
    }

    /// Messages the client wrote so far, decompressed.
    pub fn sent(&self) -> Vec<Bytes> {
        let codec = self.header("grpc-encoding").map(|name| {
            grpcwire_client::CompressionRegistry::default()
                .resolve(name)
                .expect("registered encoding")
        });
        let mut decoder = FrameDecoder::new(codec);
        let mut messages = Vec::new();
        for frame in self.writer.frames() {
            for message in decoder.decode(&frame).expect("valid frames") {
                messages.push(message.into_payload().expect("payload"));
            }
        }
        messages
    }
}

pub fn grpc_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", HeaderValue::from_static("application/grpc"));
    headers
}

pub fn status_headers(code: Code, message: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("grpc-status", HeaderValue::from(code.as_i32()));
    if let Some(message) = message {
        headers.insert(
            "grpc-message",
            HeaderValue::from_str(&encode_grpc_message(message)).expect("encoded message"),
        );
    }
    headers
}

#[derive(Default)]
pub struct MockWriter {
    frames: Mutex<Vec<Bytes>>,
    unflushed: AtomicUsize,
    limit: usize,
    ended: AtomicBool,
    reset: AtomicBool,
    drain: Mutex<Option<DrainHandler>>,
}

impl MockWriter {
    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    pub fn is_reset(&self) -> bool {
        self.reset.load(Ordering::SeqCst)
    }

    /// Pretend the peer consumed everything written so far.
    pub fn flush(&self) {
        let was_full = self.write_queue_full();
        self.unflushed.store(0, Ordering::SeqCst);
        if !was_full {
            return;
        }
        let handler = self.drain.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut handler) = handler {
            handler();
            let mut slot = self.drain.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(handler);
            }
        }
    }
}

impl TransportWriter for MockWriter {
    fn write(&self, data: Bytes) -> bool {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data);
        self.unflushed.fetch_add(1, Ordering::SeqCst) + 1 >= self.limit
    }

    fn write_queue_full(&self) -> bool {
        self.unflushed.load(Ordering::SeqCst) >= self.limit
    }

    fn drain_handler(&self, handler: DrainHandler) {
        *self.drain.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockReader {
    paused: AtomicBool,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
}

impl MockReader {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.resumes.load(Ordering::SeqCst)
    }
}

impl TransportReader for MockReader {
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}
