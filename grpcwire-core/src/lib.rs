//! Wire protocol types for gRPC over HTTP/2.
//!
//! This crate is sans-IO: it never touches a socket or an async runtime. The
//! client crate (`grpcwire-client`) drives it from transport callbacks.
//!
//! ## Modules
//!
//! - [`error`]: Status codes, [`Status`] and [`FrameError`]
//! - [`codec`]: Compression codec trait and implementations
//! - [`compression`]: Encoding names and the [`CompressionRegistry`]
//! - [`message`]: [`GrpcMessage`] with lazy decompression
//! - [`frame`]: Length-prefixed framing and the incremental [`FrameDecoder`]
//! - [`queue`]: [`FlowControlledQueue`] for credit-based delivery

mod codec;
mod compression;
mod error;
mod frame;
mod message;
mod queue;

pub use codec::*;
pub use compression::*;
pub use error::*;
pub use frame::*;
pub use message::*;
pub use queue::*;
