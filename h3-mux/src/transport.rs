//! Seams toward the QUIC transport and the event loop.
//!
//! The multiplexing core never touches QUIC internals: packets, streams and
//! timers are reached through the traits below. A transport implementation
//! wraps its library of choice; the tests drive the core with mocks.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use h3_mux_proto::ErrorCode;
use thiserror::Error;

/// A QUIC stream identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport raised a connection-level error with the given code.
    #[error("connection error {0:#x}")]
    Connection(u64),

    #[error("transport error: {0}")]
    Other(String),
}

/// The authenticated identity a server mints into its connection IDs.
///
/// `node_id` and `thread_id` route packets between instances and shards; a
/// packet is ours only when both are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCid {
    pub master_id: u64,
    pub node_id: u64,
    pub thread_id: u64,
}

/// One QUIC packet decoded out of a datagram. Borrows the datagram bytes.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub data: &'a [u8],
    /// The destination connection ID, as raw bytes.
    pub dcid: &'a [u8],
    /// Initial and 0-RTT packets carry a client-chosen destination CID that
    /// cannot be authenticated.
    pub client_generated_cid: bool,
    /// The authenticated decode of a server-minted destination CID.
    pub cid: Option<DecodedCid>,
}

/// An outbound datagram produced by the transport.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub dest: SocketAddr,
    pub data: Bytes,
}

/// Stream activity reported by the transport while processing packets.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The peer opened a unidirectional stream.
    UniOpen { id: StreamId },
    /// Stream bytes arrived; `offset` is relative to the unconsumed front of
    /// the receive buffer.
    Data {
        id: StreamId,
        offset: u64,
        data: Bytes,
    },
    /// The peer reset the sending side of an ingress stream.
    ReceiveReset { id: StreamId, code: u64 },
    /// The transport durably handed off the first `delta` bytes of the egress
    /// stream's send buffer.
    SendShift { id: StreamId, delta: usize },
    /// The peer asked us to stop sending on an egress stream.
    SendStop { id: StreamId, code: u64 },
    /// The transport destroyed a stream; drop any state held for it.
    Destroy { id: StreamId },
}

/// Outcome of asking the transport for outbound datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    /// Zero or more datagrams were appended to the batch.
    Packets,
    /// The connection has fully drained and must be destroyed now.
    Free,
}

/// The egress side the transport pulls from while building packets.
///
/// Implemented by the connection state: each egress unistream exposes its send
/// buffer through the `(emit, shift)` pair instead of copying bytes into the
/// transport eagerly.
pub trait EgressSource {
    /// Copy up to `dst.len()` bytes at `offset` of the stream's send buffer
    /// into `dst`. Returns the bytes copied and whether that reached the end
    /// of the buffered data.
    fn emit(&mut self, id: StreamId, offset: usize, dst: &mut [u8]) -> (usize, bool);

    /// The first `delta` buffered bytes are the transport's now; drop them.
    fn shift(&mut self, id: StreamId, delta: usize);
}

/// A single QUIC transport connection.
pub trait Transport {
    /// Feed one decoded packet, collecting the stream events it produced.
    fn receive(
        &mut self,
        now: Instant,
        peer: SocketAddr,
        packet: &Packet<'_>,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), TransportError>;

    /// Confirm a looked-up packet is really destined to this connection.
    fn is_destination(&self, peer: SocketAddr, packet: &Packet<'_>) -> bool;

    /// Open a locally-initiated unidirectional stream.
    fn open_uni(&mut self) -> Result<StreamId, TransportError>;

    /// The egress stream's send buffer changed; reread it when emitting.
    fn sync_send(&mut self, id: StreamId);

    /// Contiguous bytes available at the front of the ingress stream.
    fn recv_window(&self, id: StreamId) -> usize;

    /// The receive side has delivered everything it ever will.
    fn recv_complete(&self, id: StreamId) -> bool;

    /// Release `n` consumed bytes back to the stream's flow-control window.
    fn consume_recv(&mut self, id: StreamId, n: usize);

    /// Ask the peer to stop sending on an ingress stream.
    fn stop_sending(&mut self, id: StreamId, code: ErrorCode);

    /// Fill `out` with at most `max` datagrams, pulling egress stream bytes
    /// through `src`. Appending fewer than `max` means the transport has
    /// nothing further to send right now.
    fn emit(
        &mut self,
        now: Instant,
        src: &mut dyn EgressSource,
        out: &mut Vec<Datagram>,
        max: usize,
    ) -> Result<Emitted, TransportError>;

    /// The next point in time the transport needs to run, if any.
    fn next_timeout(&self) -> Option<Instant>;

    /// The authenticated identity embedded in our minted CIDs.
    fn master_id(&self) -> u64;

    /// The client's original destination CID. `None` on client-side
    /// connections.
    fn offered_cid(&self) -> Option<&[u8]>;

    fn peer_addr(&self) -> SocketAddr;

    /// Terminate the connection with an application error.
    fn close(&mut self, code: ErrorCode, reason: &str);
}

/// Context-level transport operations: packet decoding and the server accept
/// path.
pub trait Endpoint {
    type Conn: Transport;

    /// Split one datagram into its QUIC packets, appending to `out`.
    /// Undecodable bytes are dropped silently.
    fn decode<'a>(&mut self, datagram: &'a [u8], out: &mut Vec<Packet<'a>>);

    /// Maybe create a connection for a group of packets that matched no
    /// existing one. The implementation consumes the packets (handshake
    /// processing) when it accepts.
    fn accept(
        &mut self,
        now: Instant,
        peer: SocketAddr,
        packets: &[Packet<'_>],
    ) -> Option<(Self::Conn, Box<dyn crate::Events>)>;
}

/// The event loop's timer surface: a monotonic clock plus one linkable timer
/// per connection, keyed by master-id.
pub trait Timers {
    fn now(&self) -> Instant;
    fn link(&mut self, master_id: u64, deadline: Instant);
    fn unlink(&mut self, master_id: u64);
}
