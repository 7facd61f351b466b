//! Client builder.
//!
//! Provides a fluent API for configuring and building a [`GrpcClient`].

use std::sync::Arc;
use std::time::Duration;

use grpcwire_core::{Codec, CompressionRegistry, DEFAULT_MAX_MESSAGE_SIZE, FlowControlledQueue};
use http::Uri;
use http::header::HeaderValue;

use crate::ClientError;
use crate::client::{ClientInner, GrpcClient};
use crate::metadata::Metadata;
use crate::transport::{HyperTransport, Transport};

/// Default `user-agent` sent with every call.
pub const DEFAULT_USER_AGENT: &str = concat!("grpcwire-client/", env!("CARGO_PKG_VERSION"));

/// Builder for creating a [`GrpcClient`].
///
/// # Example
///
/// ```ignore
/// use grpcwire_client::ClientBuilder;
/// use std::time::Duration;
///
/// let client = ClientBuilder::new("http://localhost:50051")
///     .request_encoding("gzip")
///     .timeout(Duration::from_secs(10))
///     .default_header("x-api-key", "secret")
///     .build()?;
/// ```
pub struct ClientBuilder {
    /// Base URL for the service (e.g., "http://localhost:50051").
    base_url: String,
    /// Transport to open streams with; a [`HyperTransport`] when unset.
    transport: Option<Arc<dyn Transport>>,
    /// Codecs available for requests and responses.
    registry: CompressionRegistry,
    /// Encoding for outgoing messages.
    request_encoding: Option<String>,
    /// Default deadline for calls.
    default_timeout: Option<Duration>,
    /// Largest response message accepted.
    max_receive_message_size: usize,
    /// Buffered response messages before the transport is paused.
    response_high_water_mark: usize,
    user_agent: Option<String>,
    /// Metadata sent with every call.
    default_metadata: Metadata,
    /// First invalid setting, reported by `build`.
    error: Option<ClientError>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("transport", &self.transport.is_some())
            .field("registry", &self.registry)
            .field("request_encoding", &self.request_encoding)
            .field("default_timeout", &self.default_timeout)
            .field("max_receive_message_size", &self.max_receive_message_size)
            .field("response_high_water_mark", &self.response_high_water_mark)
            .field("user_agent", &self.user_agent)
            .field("default_metadata", &self.default_metadata.len())
            .finish()
    }
}

impl ClientBuilder {
    /// Create a new ClientBuilder with the given base URL.
    ///
    /// The base URL includes the scheme and host, e.g.
    /// "http://localhost:50051", and may carry a path prefix.
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            transport: None,
            registry: CompressionRegistry::default(),
            request_encoding: None,
            default_timeout: None,
            max_receive_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            response_high_water_mark: FlowControlledQueue::<()>::DEFAULT_HIGH_WATER_MARK,
            user_agent: None,
            default_metadata: Metadata::empty(),
            error: None,
        }
    }

    /// Use a custom transport instead of the default [`HyperTransport`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let transport = HyperTransport::builder()
    ///     .h2_keep_alive_interval(Duration::from_secs(30))
    ///     .build()?;
    ///
    /// let client = ClientBuilder::new("https://api.example.com")
    ///     .transport(transport)
    ///     .build()?;
    /// ```
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Compress outgoing messages with `encoding` (default: identity).
    ///
    /// The encoding must be registered; `build` fails otherwise.
    pub fn request_encoding(mut self, encoding: &str) -> Self {
        self.request_encoding = Some(encoding.to_string());
        self
    }

    /// Register a codec, replacing a built-in one of the same name.
    ///
    /// Registered codecs are advertised in `grpc-accept-encoding` and may be
    /// used by both sides.
    pub fn register_codec<C: Codec>(mut self, codec: C) -> Self {
        self.registry.register(codec);
        self
    }

    /// Replace the whole codec registry.
    pub fn compression_registry(mut self, registry: CompressionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the default deadline for calls.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the largest response message accepted, after decompression
    /// checks are applied to the framed length (default: 4 MiB).
    pub fn max_receive_message_size(mut self, limit: usize) -> Self {
        self.max_receive_message_size = limit;
        self
    }

    /// Set how many response messages may be buffered before the transport
    /// stops reading (default: 16).
    pub fn response_high_water_mark(mut self, mark: usize) -> Self {
        self.response_high_water_mark = mark;
        self
    }

    pub fn user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Add a metadata entry sent with every call.
    ///
    /// An invalid key or value is reported by `build`.
    pub fn default_header(mut self, key: &str, value: &str) -> Self {
        if let Err(e) = self.default_metadata.append(key, value) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GrpcClient, ClientError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let base_uri = parse_base_url(&self.base_url)?;

        let request_codec = match &self.request_encoding {
            Some(encoding) => self
                .registry
                .resolve(encoding)
                .map_err(|e| ClientError::Build(format!("request encoding: {e}")))?,
            None => grpcwire_core::BoxedCodec::identity(),
        };

        let user_agent = self.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        let user_agent = HeaderValue::from_str(user_agent)
            .map_err(|e| ClientError::Build(format!("user agent: {e}")))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new()?),
        };

        Ok(GrpcClient::new(ClientInner {
            transport,
            base_uri,
            registry: self.registry,
            request_codec,
            default_timeout: self.default_timeout,
            max_receive_message_size: self.max_receive_message_size,
            response_high_water_mark: self.response_high_water_mark,
            user_agent,
            default_metadata: self.default_metadata,
        }))
    }
}

/// Parse and check the base URL: `http` or `https`, with a host.
fn parse_base_url(base_url: &str) -> Result<Uri, ClientError> {
    let uri: Uri = base_url
        .trim_end_matches('/')
        .parse()
        .map_err(|e| ClientError::InvalidUri(format!("{base_url}: {e}")))?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => {
            return Err(ClientError::InvalidUri(format!(
                "{base_url}: scheme must be http or https"
            )));
        }
    }
    if uri.authority().is_none() {
        return Err(ClientError::InvalidUri(format!("{base_url}: missing host")));
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    impl Transport for NullTransport {
        fn open(
            &self,
            _head: http::request::Parts,
            sink: crate::transport::ResponseSink,
        ) -> Arc<dyn crate::transport::TransportWriter> {
            sink.fail(ClientError::Transport("null transport".into()));
            Arc::new(NullWriter)
        }
    }

    struct NullWriter;

    impl crate::transport::TransportWriter for NullWriter {
        fn write(&self, _data: bytes::Bytes) -> bool {
            false
        }
        fn write_queue_full(&self) -> bool {
            false
        }
        fn drain_handler(&self, _handler: grpcwire_core::DrainHandler) {}
        fn end(&self) {}
        fn reset(&self) {}
    }

    fn builder(url: &str) -> ClientBuilder {
        ClientBuilder::new(url).transport(NullTransport)
    }

    #[test]
    fn test_builder_defaults() {
        let client = builder("http://localhost:50051").build().unwrap();
        assert_eq!(client.base_uri().host(), Some("localhost"));
        assert_eq!(client.base_uri().port_u16(), Some(50051));
        assert!(client.accept_encoding().starts_with("identity"));
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let client = builder("http://localhost:50051/api/").build().unwrap();
        assert_eq!(client.base_uri().path(), "/api");
    }

    #[test]
    fn test_builder_rejects_bad_urls() {
        for url in ["localhost:50051", "ftp://example.com", "not a url", "http://"] {
            assert!(builder(url).build().is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn test_builder_rejects_unknown_encoding() {
        let err = builder("http://localhost").request_encoding("snappy").build();
        assert!(matches!(err, Err(ClientError::Build(_))));
    }

    #[test]
    fn test_builder_reports_invalid_header() {
        let err = builder("http://localhost")
            .default_header("bad key", "value")
            .build();
        assert!(matches!(err, Err(ClientError::InvalidMetadata(_))));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_builder_request_encoding() {
        let client = builder("http://localhost").request_encoding("gzip").build().unwrap();
        let request = client.request("echo.Echo/Say").unwrap();
        assert_eq!(request.encoding(), "gzip");
    }

    #[test]
    fn test_builder_debug() {
        let debug = format!("{:?}", builder("http://localhost").timeout(Duration::from_secs(5)));
        assert!(debug.contains("ClientBuilder"));
        assert!(debug.contains("5s"));
    }
}
