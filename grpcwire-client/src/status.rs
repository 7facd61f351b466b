//! Status resolution from response heads and trailers.

use grpcwire_core::{Code, Status};
use http::{HeaderMap, StatusCode};
use percent_encoding::{AsciiSet, CONTROLS, percent_decode, utf8_percent_encode};

use crate::metadata::decode_bin;

pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";

/// Map a non-200 HTTP status to the gRPC code a client reports for it.
pub fn http_status_to_code(status: StatusCode) -> Code {
    match status.as_u16() {
        200 => Code::Ok,
        400 => Code::Internal,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::Unimplemented,
        429 | 502 | 503 | 504 => Code::Unavailable,
        _ => Code::Unknown,
    }
}

/// Read the terminal status from a trailer block (or a trailers-only head).
///
/// Returns `None` when `grpc-status` is absent. An unparsable value resolves
/// to `UNKNOWN`.
pub fn status_from_metadata(headers: &HeaderMap) -> Option<Status> {
    let raw = headers.get(GRPC_STATUS)?;
    let code = raw
        .to_str()
        .ok()
        .and_then(|s| s.parse::<Code>().ok());
    let Some(code) = code else {
        return Some(Status::unknown(format!(
            "malformed grpc-status: {:?}",
            String::from_utf8_lossy(raw.as_bytes())
        )));
    };

    let mut status = match headers.get(GRPC_MESSAGE) {
        Some(message) => Status::new(code, decode_grpc_message(message.as_bytes())),
        None => Status::from_code(code),
    };
    if let Some(details) = headers
        .get(GRPC_STATUS_DETAILS_BIN)
        .and_then(|v| decode_bin(v.as_bytes()))
    {
        status = status.with_details(details);
    }
    Some(status)
}

/// Resolve trailers into a status. Trailers without `grpc-status` resolve
/// to `UNKNOWN`.
pub fn status_from_trailers(trailers: &HeaderMap) -> Status {
    status_from_metadata(trailers)
        .unwrap_or_else(|| Status::unknown("trailers did not include grpc-status"))
}

/// Characters escaped in `grpc-message`. Non-ASCII bytes are always
/// escaped by `utf8_percent_encode`.
const GRPC_MESSAGE_ESCAPES: &AsciiSet = &CONTROLS.add(b'%');

/// Percent-decode a `grpc-message` value. Malformed escapes are kept as is.
pub fn decode_grpc_message(raw: &[u8]) -> String {
    percent_decode(raw).decode_utf8_lossy().into_owned()
}

/// Percent-encode a `grpc-message` value: everything outside printable
/// ASCII, and `%` itself, is escaped.
pub fn encode_grpc_message(message: &str) -> String {
    utf8_percent_encode(message, GRPC_MESSAGE_ESCAPES).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn trailers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(*v));
        }
        map
    }

    #[test]
    fn test_http_status_to_code() {
        assert_eq!(http_status_to_code(StatusCode::BAD_REQUEST), Code::Internal);
        assert_eq!(http_status_to_code(StatusCode::UNAUTHORIZED), Code::Unauthenticated);
        assert_eq!(http_status_to_code(StatusCode::FORBIDDEN), Code::PermissionDenied);
        assert_eq!(http_status_to_code(StatusCode::NOT_FOUND), Code::Unimplemented);
        assert_eq!(http_status_to_code(StatusCode::SERVICE_UNAVAILABLE), Code::Unavailable);
        assert_eq!(http_status_to_code(StatusCode::IM_A_TEAPOT), Code::Unknown);
    }

    #[test]
    fn test_status_ok() {
        let status = status_from_trailers(&trailers(&[("grpc-status", "0")]));
        assert!(status.is_ok());
        assert_eq!(status.message(), None);
    }

    #[test]
    fn test_status_with_encoded_message() {
        let status = status_from_trailers(&trailers(&[
            ("grpc-status", "14"),
            ("grpc-message", "peer%20gone%20%E2%9C%93"),
        ]));
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.message(), Some("peer gone \u{2713}"));
    }

    #[test]
    fn test_missing_grpc_status_is_unknown() {
        assert!(status_from_metadata(&trailers(&[("grpc-message", "x")])).is_none());
        let status = status_from_trailers(&trailers(&[("grpc-message", "x")]));
        assert_eq!(status.code(), Code::Unknown);
    }

    #[test]
    fn test_malformed_grpc_status_is_unknown() {
        let status = status_from_trailers(&trailers(&[("grpc-status", "fourteen")]));
        assert_eq!(status.code(), Code::Unknown);
    }

    #[test]
    fn test_status_details_bin() {
        let status = status_from_trailers(&trailers(&[
            ("grpc-status", "3"),
            ("grpc-status-details-bin", "CAM"),
        ]));
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.details().unwrap().as_ref(), &[0x08, 0x03]);
    }

    #[test]
    fn test_percent_round_trip() {
        let message = "100% done\nnext: \u{e9}";
        let encoded = encode_grpc_message(message);
        assert_eq!(encoded, "100%25 done%0Anext: %C3%A9");
        assert_eq!(decode_grpc_message(encoded.as_bytes()), message);
    }

    #[test]
    fn test_percent_decode_keeps_malformed_escapes() {
        assert_eq!(decode_grpc_message(b"50%"), "50%");
        assert_eq!(decode_grpc_message(b"%zz"), "%zz");
        assert_eq!(decode_grpc_message(b"bad%FFbyte"), "bad\u{fffd}byte");
    }
}
