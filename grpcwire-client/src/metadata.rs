//! Request and response metadata.

use base64::engine::DecodePaddingMode;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD_NO_PAD};
use base64::{Engine, alphabet};
use bytes::Bytes;
use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::ClientError;

/// Suffix marking binary metadata, carried base64 encoded on the wire.
pub const BINARY_SUFFIX: &str = "-bin";

/// gRPC metadata: a case-insensitive multimap over HTTP headers.
///
/// Used for request headers, response headers and trailers alike. Keys
/// ending in `-bin` hold binary values; [`insert_bin`](Self::insert_bin) and
/// [`get_bin`](Self::get_bin) handle their base64 encoding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    headers: HeaderMap,
}

impl Metadata {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Get an ASCII value by key.
    ///
    /// Returns `None` if the key is absent or the value is not visible ASCII.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.to_str().ok())
    }

    /// Get the raw value bytes.
    pub fn get_bytes(&self, key: &str) -> Option<&[u8]> {
        self.headers.get(key).map(|v| v.as_bytes())
    }

    /// Get a binary value, decoding base64 (padded or not).
    pub fn get_bin(&self, key: &str) -> Option<Bytes> {
        decode_bin(self.headers.get(key)?.as_bytes())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.headers.contains_key(key)
    }

    /// Get all values for a key that appears multiple times.
    pub fn get_all(&self, key: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
    }

    /// Set an ASCII value, replacing any existing ones.
    pub fn insert(&mut self, key: &str, value: &str) -> Result<(), ClientError> {
        let (name, value) = ascii_entry(key, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Add an ASCII value, keeping existing ones.
    pub fn append(&mut self, key: &str, value: &str) -> Result<(), ClientError> {
        let (name, value) = ascii_entry(key, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Set a binary value. The key must end in `-bin`.
    pub fn insert_bin(&mut self, key: &str, value: &[u8]) -> Result<(), ClientError> {
        if !key.ends_with(BINARY_SUFFIX) {
            return Err(ClientError::InvalidMetadata(format!(
                "binary metadata key must end in {BINARY_SUFFIX}: {key}"
            )));
        }
        let name = header_name(key)?;
        let encoded = STANDARD_NO_PAD.encode(value);
        let value = HeaderValue::from_str(&encoded)
            .map_err(|e| ClientError::InvalidMetadata(e.to_string()))?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        self.headers.remove(key)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> {
        self.headers.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }
}

impl From<HeaderMap> for Metadata {
    fn from(headers: HeaderMap) -> Self {
        Self::new(headers)
    }
}

impl From<Metadata> for HeaderMap {
    fn from(metadata: Metadata) -> Self {
        metadata.headers
    }
}

fn header_name(key: &str) -> Result<HeaderName, ClientError> {
    HeaderName::from_bytes(key.as_bytes())
        .map_err(|e| ClientError::InvalidMetadata(format!("key {key:?}: {e}")))
}

fn ascii_entry(key: &str, value: &str) -> Result<(HeaderName, HeaderValue), ClientError> {
    let name = header_name(key)?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| ClientError::InvalidMetadata(format!("value for {key}: {e}")))?;
    Ok((name, value))
}

/// gRPC peers may send `-bin` values with or without padding.
const BIN_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode a `-bin` value.
pub(crate) fn decode_bin(raw: &[u8]) -> Option<Bytes> {
    BIN_DECODER.decode(raw).ok().map(Bytes::from)
}
