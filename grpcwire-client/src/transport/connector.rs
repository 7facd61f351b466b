//! TLS connector setup for the hyper transport.
//!
//! # Feature Flags
//!
//! TLS support requires both a crypto provider and root certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! Without a crypto provider feature, a provider installed through
//! `rustls::crypto::CryptoProvider::install_default()` is used.

use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

use crate::ClientError;

/// Returns true if both a crypto provider AND root certificates are enabled.
#[inline]
pub const fn has_tls_support() -> bool {
    cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
        && cfg!(any(
            feature = "tls-native-roots",
            feature = "tls-webpki-roots"
        ))
}

/// The crypto provider TLS is built on.
///
/// A feature-gated provider (`tls-ring`, then `tls-aws-lc`) wins over one
/// installed as the process default.
fn crypto_provider() -> Option<Arc<CryptoProvider>> {
    #[cfg(feature = "tls-ring")]
    let provider = Some(Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    let provider = Some(Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    let provider = CryptoProvider::get_default().cloned();

    provider
}

fn config_builder(
    provider: Arc<CryptoProvider>,
) -> Option<rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>> {
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .ok()
}

/// Build the default TLS configuration, advertising `h2` over ALPN.
///
/// Returns `None` if no crypto provider is available.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub fn default_tls_config() -> Option<ClientConfig> {
    let mut config = config_builder(crypto_provider()?)?
        .with_root_certificates(build_root_store())
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    Some(config)
}

/// Build the root certificate store from enabled features.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn build_root_store() -> rustls::RootCertStore {
    let mut roots = rustls::RootCertStore::empty();

    // Prefer native over webpki if both are enabled
    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::debug!("errors loading native certs: {:?}", native_certs.errors);
        }
        roots.add_parsable_certificates(native_certs.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

/// Build an HTTP/2 connector for `http://` (h2c) and `https://` targets.
///
/// Without an explicit config the default one is used. Fails when neither
/// is available, i.e. no root certificate feature or no crypto provider.
pub fn build_https_connector(
    tls_config: Option<ClientConfig>,
) -> Result<HttpsConnector<HttpConnector>, ClientError> {
    let config = match tls_config {
        Some(config) => config,
        None => fallback_tls_config()?,
    };

    Ok(HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_http2()
        .build())
}

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn fallback_tls_config() -> Result<ClientConfig, ClientError> {
    default_tls_config().ok_or_else(|| {
        ClientError::Build(
            "HTTPS requires a crypto provider: enable `tls-ring` or `tls-aws-lc`, \
             or install one via `CryptoProvider::install_default()`"
                .into(),
        )
    })
}

#[cfg(not(any(feature = "tls-native-roots", feature = "tls-webpki-roots")))]
fn fallback_tls_config() -> Result<ClientConfig, ClientError> {
    Err(ClientError::Build(
        "no TLS root certificates: enable `tls-native-roots` or `tls-webpki-roots`, \
         or pass a config to `HyperTransportBuilder::tls_config`"
            .into(),
    ))
}

/// Verifier that skips certificate chain and name validation.
///
/// Handshake signatures are still checked against the provider's algorithms,
/// so the peer must hold the key of the certificate it presents.
///
/// # Warning
///
/// Only for development and testing. It makes the connection vulnerable to
/// man-in-the-middle attacks.
#[derive(Debug)]
pub struct DangerousAcceptAnyCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl DangerousAcceptAnyCertVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for DangerousAcceptAnyCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// TLS config (ALPN `h2`) that accepts any server certificate.
///
/// Requires a crypto provider, either via feature flags or a user-installed
/// global default.
pub fn danger_accept_invalid_certs_config() -> Result<ClientConfig, ClientError> {
    let missing = || {
        ClientError::Build(
            "danger_accept_invalid_certs requires a crypto provider: enable `tls-ring` \
             or `tls-aws-lc`, or install one via `CryptoProvider::install_default()`"
                .into(),
        )
    };
    let provider = crypto_provider().ok_or_else(missing)?;
    let verifier = DangerousAcceptAnyCertVerifier::new(provider.clone());

    let mut config = config_builder(provider)
        .ok_or_else(missing)?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}
