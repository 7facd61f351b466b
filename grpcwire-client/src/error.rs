//! Client-side error types.
//!
//! [`ClientError`] is returned from fallible calls: building a client,
//! opening a request, writing to it, or awaiting a response that never
//! arrived. Failures after response headers are not errors at all; they
//! resolve the response stream's terminal [`Status`].

use grpcwire_core::{Code, FrameError, Status};

/// Client-side error variants.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ClientError {
    /// The call failed with a gRPC status (e.g. cancelled, deadline exceeded,
    /// or a non-OK unary result).
    #[error("{0}")]
    Status(Status),

    /// Transport-level error (connection refused, reset, TLS failure, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// Framing or compression error.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A call was made in a state that does not allow it, such as writing
    /// after `end()` or editing headers after they were sent.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    /// The target URI or method path is malformed.
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    /// A metadata key or value cannot be carried in an HTTP/2 header.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Client configuration was rejected.
    #[error("failed to build client: {0}")]
    Build(String),
}

impl ClientError {
    /// Get the gRPC code that best describes this error.
    ///
    /// - Status: its code
    /// - Transport: `Unavailable`
    /// - Frame: per [`FrameError::to_status`]
    /// - IllegalState: `FailedPrecondition`
    /// - InvalidUri / InvalidMetadata / Build: `InvalidArgument`
    pub fn code(&self) -> Code {
        match self {
            ClientError::Status(status) => status.code(),
            ClientError::Transport(_) => Code::Unavailable,
            ClientError::Frame(err) => err.to_status().code(),
            ClientError::IllegalState(_) => Code::FailedPrecondition,
            ClientError::InvalidUri(_)
            | ClientError::InvalidMetadata(_)
            | ClientError::Build(_) => Code::InvalidArgument,
        }
    }

    /// Convert into the status a response observer would see.
    pub fn to_status(&self) -> Status {
        match self {
            ClientError::Status(status) => status.clone(),
            ClientError::Frame(err) => err.to_status(),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        ClientError::Status(status)
    }
}

impl From<http::Error> for ClientError {
    fn from(err: http::Error) -> Self {
        ClientError::InvalidUri(err.to_string())
    }
}
