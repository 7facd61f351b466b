//! gRPC client implementation.
//!
//! This module provides the main [`GrpcClient`] type for opening calls.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc;
use grpcwire_core::{BoxedCodec, CompressionRegistry, GrpcMessage, Status};
use http::Uri;
use http::header::HeaderValue;
#[cfg(feature = "tracing")]
use tracing::info_span;

use crate::ClientError;
use crate::builder::ClientBuilder;
use crate::lifecycle::ResponseSink;
use crate::metadata::Metadata;
use crate::options::CallOptions;
use crate::request::{ClientRequestStream, RequestParts};
use crate::response::{ClientResponseStream, ResponseConfig};
use crate::transport::Transport;

/// Stub-free gRPC client.
///
/// Every call is opened by method path and exchanges opaque message bytes;
/// serialization is up to the caller. Cheap to clone; clones share the
/// transport and its connection pool.
///
/// Use [`ClientBuilder`] or [`GrpcClient::builder`] to create an instance.
///
/// # Example
///
/// ```ignore
/// use grpcwire_client::{GrpcClient, GrpcMessage};
///
/// let client = GrpcClient::builder("http://localhost:50051").build()?;
///
/// let mut request = client.request("helloworld.Greeter/SayHello")?;
/// let response = request.response();
/// request.end_with(GrpcMessage::from(encoded_hello))?;
///
/// let response = response.await?;
/// response.message_handler(|msg| handle(msg));
/// let status = response.finished().await;
/// ```
#[derive(Clone)]
pub struct GrpcClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub transport: Arc<dyn Transport>,
    /// Scheme, authority and optional path prefix of every call.
    pub base_uri: Uri,
    pub registry: CompressionRegistry,
    pub request_codec: BoxedCodec,
    pub default_timeout: Option<Duration>,
    pub max_receive_message_size: usize,
    pub response_high_water_mark: usize,
    pub user_agent: HeaderValue,
    pub default_metadata: Metadata,
}

impl GrpcClient {
    /// Create a new ClientBuilder with the given base URL.
    pub fn builder<S: Into<String>>(base_url: S) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    pub(crate) fn new(inner: ClientInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn base_uri(&self) -> &Uri {
        &self.inner.base_uri
    }

    /// Encodings this client accepts, as advertised in `grpc-accept-encoding`.
    pub fn accept_encoding(&self) -> String {
        self.inner.registry.accept_encoding()
    }

    /// Open a call to `method` (`"package.Service/Method"`).
    ///
    /// Nothing is sent until the request headers go out, so metadata and
    /// encoding can still be adjusted on the returned stream.
    pub fn request(&self, method: &str) -> Result<ClientRequestStream, ClientError> {
        self.request_with_options(method, CallOptions::default())
    }

    /// Open a call with per-call options.
    ///
    /// The options' timeout overrides the client default; their metadata is
    /// added on top of the client's default metadata.
    pub fn request_with_options(
        &self,
        method: &str,
        options: CallOptions,
    ) -> Result<ClientRequestStream, ClientError> {
        let uri = method_uri(&self.inner.base_uri, method)?;

        let mut metadata = self.inner.default_metadata.clone();
        let call_metadata = options.metadata.headers();
        for name in call_metadata.keys() {
            let headers = metadata.headers_mut();
            headers.remove(name);
            for value in call_metadata.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        let response = ClientResponseStream::new(ResponseConfig {
            registry: self.inner.registry.clone(),
            max_message_size: self.inner.max_receive_message_size,
            high_water_mark: self.inner.response_high_water_mark,
        });
        let (sink, response) = ResponseSink::new(response);

        #[cfg(feature = "tracing")]
        let span = info_span!(
            "grpc.call",
            rpc.method = %method,
            rpc.encoding = %self.inner.request_codec.name(),
            otel.kind = "client",
        );

        Ok(ClientRequestStream::new(RequestParts {
            transport: self.inner.transport.clone(),
            uri,
            metadata,
            codec: self.inner.request_codec.clone(),
            registry: self.inner.registry.clone(),
            timeout: options.timeout.or(self.inner.default_timeout),
            user_agent: self.inner.user_agent.clone(),
            sink,
            response,
            #[cfg(feature = "tracing")]
            span,
        }))
    }

    /// Make a unary call: send one message, receive one message.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if:
    /// - The method path is malformed
    /// - The connection fails before response headers
    /// - The call ends with a non-OK status
    /// - The server sends zero or several messages
    pub async fn unary(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
    ) -> Result<UnaryResponse, ClientError> {
        self.unary_with_options(method, payload, CallOptions::default())
            .await
    }

    /// Make a unary call with per-call options.
    pub async fn unary_with_options(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
        options: CallOptions,
    ) -> Result<UnaryResponse, ClientError> {
        let mut request = self.request_with_options(method, options)?;
        let response = request.response();
        request.end_with(GrpcMessage::new(payload))?;

        let response = response.await?;
        let (tx, rx) = mpsc::unbounded();
        response.message_handler(move |message| {
            let _ = tx.unbounded_send(message);
        });
        let status = response.finished().await;
        if !status.is_ok() {
            return Err(ClientError::Status(status));
        }

        // The handler, and with it the sender, is dropped once the stream ends.
        let mut messages: Vec<GrpcMessage> = rx.collect().await;
        let message = match (messages.pop(), messages.is_empty()) {
            (Some(message), true) => message,
            (None, _) => {
                return Err(Status::internal("no response message for unary call").into());
            }
            (Some(_), false) => {
                return Err(Status::internal("too many response messages for unary call").into());
            }
        };

        Ok(UnaryResponse {
            headers: response.headers(),
            message: message.into_payload()?,
            trailers: response.trailers().unwrap_or_default(),
        })
    }
}

impl std::fmt::Debug for GrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClient")
            .field("base_uri", &self.inner.base_uri)
            .field("request_encoding", &self.inner.request_codec.name())
            .field("accept_encoding", &self.inner.registry.accept_encoding())
            .field("default_timeout", &self.inner.default_timeout)
            .field("max_receive_message_size", &self.inner.max_receive_message_size)
            .finish_non_exhaustive()
    }
}

/// Result of a unary call.
#[derive(Debug, Clone)]
pub struct UnaryResponse {
    headers: Metadata,
    message: Bytes,
    trailers: Metadata,
}

impl UnaryResponse {
    pub fn message(&self) -> &Bytes {
        &self.message
    }

    pub fn into_message(self) -> Bytes {
        self.message
    }

    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    pub fn trailers(&self) -> &Metadata {
        &self.trailers
    }
}

/// Build the request URI for `method`, accepting an optional leading slash.
fn method_uri(base: &Uri, method: &str) -> Result<Uri, ClientError> {
    let path = method.strip_prefix('/').unwrap_or(method);
    let valid = path
        .split_once('/')
        .is_some_and(|(service, name)| !service.is_empty() && !name.is_empty() && !name.contains('/'));
    if !valid {
        return Err(ClientError::InvalidUri(format!(
            "method must look like \"package.Service/Method\": {method:?}"
        )));
    }

    let prefix = base.path().trim_end_matches('/');
    let mut builder = Uri::builder().path_and_query(format!("{prefix}/{path}"));
    if let Some(scheme) = base.scheme() {
        builder = builder.scheme(scheme.clone());
    }
    if let Some(authority) = base.authority() {
        builder = builder.authority(authority.clone());
    }
    Ok(builder.build()?)
}
