//! HTTP/3 draft-17 wire codec.
//!
//! This crate contains the pure protocol pieces shared by client and server:
//! QUIC variable-length integers, the `length ‖ type` frame header used by the
//! draft, the SETTINGS payload, unidirectional stream types, and application
//! error codes. It performs no I/O; everything operates on byte slices.

mod error;
mod frame;
mod settings;
mod stream;
mod varint;

pub use error::*;
pub use frame::*;
pub use settings::*;
pub use stream::*;
pub use varint::*;

/// The ALPN identifier negotiated by this draft of the protocol.
pub const ALPN: &str = "h3-17";
