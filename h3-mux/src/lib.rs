//! HTTP/3 framing and connection multiplexing over a pluggable QUIC transport.
//!
//! This crate turns transport events (packet arrival, unidirectional stream
//! creation, stream receive and send callbacks, timer firings) into HTTP/3
//! behavior: control-stream framing, the QPACK side channels, connection
//! lookup and demultiplexing, and send scheduling against a datagram socket.
//!
//! The QUIC transport itself, the QPACK dynamic-table codecs, and the request
//! layer are collaborators behind the traits in [transport] and [qpack]. A
//! [Context] owns the connections multiplexed over one socket; [Driver] runs
//! one on tokio.

mod accept_key;
mod buffer;
mod conn;
mod ctx;
mod driver;
mod error;
pub mod qpack;
mod transport;

#[cfg(test)]
mod testing;

pub use accept_key::accepting_hash;
pub use buffer::{ReceiveBuffer, SendBuffer};
pub use conn::{Connection, Events};
pub use ctx::Context;
pub use driver::Driver;
pub use error::Error;
pub use transport::{
    Datagram, DecodedCid, EgressSource, Emitted, Endpoint, Packet, StreamEvent, StreamId, Timers,
    Transport, TransportError,
};
