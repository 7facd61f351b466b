//! gRPC status codes and wire-level error types.
//!
//! - [`Code`]: canonical gRPC status codes
//! - [`Status`]: terminal status of a call (code, message, details)
//! - [`FrameError`]: framing and compression failures

use std::str::FromStr;

use bytes::Bytes;

/// gRPC status codes, numbered as they appear in the `grpc-status` trailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl Code {
    /// Canonical upper snake case name, e.g. `UNAVAILABLE`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Map a wire number to a code. Numbers outside 0..=16 map to [`Code::Unknown`].
    pub fn from_i32(value: i32) -> Code {
        match value {
            0 => Code::Ok,
            1 => Code::Cancelled,
            2 => Code::Unknown,
            3 => Code::InvalidArgument,
            4 => Code::DeadlineExceeded,
            5 => Code::NotFound,
            6 => Code::AlreadyExists,
            7 => Code::PermissionDenied,
            8 => Code::ResourceExhausted,
            9 => Code::FailedPrecondition,
            10 => Code::Aborted,
            11 => Code::OutOfRange,
            12 => Code::Unimplemented,
            13 => Code::Internal,
            14 => Code::Unavailable,
            15 => Code::DataLoss,
            16 => Code::Unauthenticated,
            _ => Code::Unknown,
        }
    }

    /// The wire number of this code.
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a `grpc-status` value is not a decimal number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl std::fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "grpc-status is not a decimal status code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for Code {
    type Err = ParseCodeError;

    /// Parse the decimal form carried by the `grpc-status` trailer.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i32>()
            .map(Code::from_i32)
            .map_err(|_| ParseCodeError(()))
    }
}

/// The terminal status of a call.
///
/// Every response stream resolves exactly one `Status`, either read from the
/// trailers sent by the peer or synthesized locally when the transport fails.
///
/// ```
/// use grpcwire_core::{Code, Status};
///
/// let status = Status::unavailable("connection refused");
/// assert_eq!(status.code(), Code::Unavailable);
/// assert_eq!(status.to_string(), "UNAVAILABLE: connection refused");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Status {
    code: Code,
    message: Option<String>,
    details: Option<Bytes>,
}

impl Status {
    /// Create a status with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: None,
        }
    }

    /// Create a status with just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: None,
        }
    }

    /// The OK status.
    pub fn ok() -> Self {
        Self::from_code(Code::Ok)
    }

    /// Attach the raw `grpc-status-details-bin` payload.
    pub fn with_details(mut self, details: Bytes) -> Self {
        self.details = Some(details);
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Encoded `google.rpc.Status` from `grpc-status-details-bin`, if any.
    pub fn details(&self) -> Option<&Bytes> {
        self.details.as_ref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn cancelled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Cancelled, message)
    }

    pub fn unknown<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unknown, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn failed_precondition<S: Into<String>>(message: S) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code.as_str())?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

impl std::error::Error for Status {}

/// Framing and compression errors.
///
/// Any of these is fatal to the stream it occurs on. Use
/// [`FrameError::to_status`] to obtain the terminal status it resolves to.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Declared frame length exceeds the receive limit.
    #[error("frame length {length} exceeds limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },

    /// Compression flag byte is neither 0 nor 1.
    #[error("invalid frame flags: 0x{0:02x}")]
    InvalidFlags(u8),

    /// A compressed frame arrived but no encoding was negotiated.
    #[error("compressed frame received without a negotiated grpc-encoding")]
    CompressedWithoutEncoding,

    /// The named encoding is not registered.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("compression failed: {0}")]
    Compression(String),

    /// Stream ended with an incomplete frame buffered.
    #[error("stream ended with {buffered} bytes of an incomplete frame")]
    Truncated { buffered: usize },
}

impl FrameError {
    /// The terminal status a stream resolves to when this error occurs.
    pub fn to_status(&self) -> Status {
        match self {
            FrameError::FrameTooLarge { .. } => Status::resource_exhausted(self.to_string()),
            _ => Status::internal(self.to_string()),
        }
    }
}
