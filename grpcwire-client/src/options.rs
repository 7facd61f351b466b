//! Call options for per-request configuration.
//!
//! This module provides [`CallOptions`] for configuring individual calls
//! with deadlines and extra metadata.

use std::time::Duration;

use crate::ClientError;
use crate::metadata::Metadata;

/// Header carrying the call deadline to the server.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Options for configuring an individual call.
///
/// Values set here override the client defaults for this call only.
///
/// # Example
///
/// ```ignore
/// use grpcwire_client::CallOptions;
/// use std::time::Duration;
///
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("authorization", "Bearer token123")?;
///
/// let request = client.request_with_options("echo.Echo/Say", options)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub(crate) timeout: Option<Duration>,
    pub(crate) metadata: Metadata,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline for this call.
    ///
    /// The deadline is sent as `grpc-timeout` and enforced locally: when it
    /// expires the stream is reset and the call ends with `DEADLINE_EXCEEDED`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Add a metadata entry for this call.
    ///
    /// Keys beginning with `grpc-` are reserved for the protocol; applications
    /// may read them but should not write them.
    pub fn header(mut self, key: &str, value: &str) -> Result<Self, ClientError> {
        self.metadata.insert(key, value)?;
        Ok(self)
    }

    /// Replace all metadata for this call.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Largest value a `grpc-timeout` may carry (8 ASCII digits).
const MAX_TIMEOUT_VALUE: u128 = 99_999_999;

/// Encode a duration as a `grpc-timeout` value.
///
/// Picks the finest unit whose value fits in 8 digits, rounding up so a
/// deadline is never shortened. Durations beyond 99999999 hours are capped.
pub fn duration_to_timeout_header(duration: Duration) -> String {
    const UNITS: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60_000_000_000, 'M'),
        (3_600_000_000_000, 'H'),
    ];

    let nanos = duration.as_nanos();
    for (scale, unit) in UNITS {
        let value = nanos.div_ceil(scale);
        if value <= MAX_TIMEOUT_VALUE {
            return format!("{value}{unit}");
        }
    }
    format!("{MAX_TIMEOUT_VALUE}H")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_default() {
        let options = CallOptions::new();
        assert!(options.timeout.is_none());
        assert!(options.metadata.is_empty());
    }

    #[test]
    fn test_call_options_timeout() {
        let options = CallOptions::new().timeout(Duration::from_secs(30));
        assert_eq!(options.get_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_call_options_header() {
        let options = CallOptions::new()
            .header("authorization", "Bearer token123")
            .unwrap()
            .header("x-request-id", "abc-123")
            .unwrap();

        assert_eq!(options.metadata.get("authorization"), Some("Bearer token123"));
        assert_eq!(options.metadata.get("x-request-id"), Some("abc-123"));
    }

    #[test]
    fn test_call_options_header_invalid() {
        assert!(CallOptions::new().header("invalid\0name", "value").is_err());
    }

    #[test]
    fn test_call_options_metadata_mut() {
        let mut options = CallOptions::new();
        options.metadata_mut().insert("x-custom", "value").unwrap();
        assert_eq!(options.get_metadata().get("x-custom"), Some("value"));
    }

    #[test]
    fn test_duration_to_timeout_header() {
        assert_eq!(duration_to_timeout_header(Duration::ZERO), "0n");
        assert_eq!(duration_to_timeout_header(Duration::from_nanos(500)), "500n");
        assert_eq!(
            duration_to_timeout_header(Duration::from_millis(50)),
            "50000000n"
        );
        assert_eq!(duration_to_timeout_header(Duration::from_millis(100)), "100000u");
        assert_eq!(duration_to_timeout_header(Duration::from_secs(30)), "30000000u");
        assert_eq!(duration_to_timeout_header(Duration::from_secs(300)), "300000m");
        assert_eq!(
            duration_to_timeout_header(Duration::from_secs(200_000)),
            "200000S"
        );
    }

    #[test]
    fn test_duration_to_timeout_header_rounds_up() {
        // 100_000_001 ns does not fit in nanos, so it becomes 100001u.
        assert_eq!(
            duration_to_timeout_header(Duration::from_nanos(100_000_001)),
            "100001u"
        );
    }

    #[test]
    fn test_duration_to_timeout_header_caps() {
        let huge = Duration::from_secs(u64::MAX);
        assert_eq!(duration_to_timeout_header(huge), "99999999H");
    }
}
