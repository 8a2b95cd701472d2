use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::accept_key::accepting_hash;
use crate::conn::{Connection, Events};
use crate::error::Error;
use crate::qpack::QpackFactory;
use crate::transport::{Datagram, Emitted, Endpoint, Packet, Timers, Transport};

/// Decoded packets are buffered up to this many before a group is flushed.
const PACKET_BATCH: usize = 64;

/// Datagrams requested from a transport per emit call.
const SEND_BATCH: usize = 16;

/// Owns every connection multiplexed over one socket.
///
/// Two maps index the connections: `conns_by_id` keys the authenticated
/// master-id and owns the state; `conns_accepting` keys the unauthenticated
/// accepting-hash of `(peer, offered CID)` and holds only the master-id, so
/// Initial and 0-RTT packets can find a server-side connection before the
/// peer learns its minted CID.
pub struct Context<E: Endpoint> {
    endpoint: E,
    qpack: Arc<dyn QpackFactory>,
    conns_by_id: HashMap<u64, Connection<E::Conn>>,
    conns_accepting: HashMap<u64, u64>,
}

impl<E: Endpoint> Context<E> {
    pub fn new(endpoint: E, qpack: Arc<dyn QpackFactory>) -> Self {
        Self {
            endpoint,
            qpack,
            conns_by_id: HashMap::new(),
            conns_accepting: HashMap::new(),
        }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn endpoint_mut(&mut self) -> &mut E {
        &mut self.endpoint
    }

    pub fn connection(&self, master_id: u64) -> Option<&Connection<E::Conn>> {
        self.conns_by_id.get(&master_id)
    }

    pub fn connection_mut(&mut self, master_id: u64) -> Option<&mut Connection<E::Conn>> {
        self.conns_by_id.get_mut(&master_id)
    }

    pub fn len(&self) -> usize {
        self.conns_by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns_by_id.is_empty()
    }

    /// Find the connection a packet belongs to.
    ///
    /// Client-generated destination CIDs (Initial, 0-RTT) go through the keyed
    /// accepting map; server-minted CIDs decode to a master-id directly. Every
    /// hit is confirmed with the transport before being returned.
    // TODO recognize stateless resets for connections absent from both maps.
    pub fn lookup(&self, peer: SocketAddr, packet: &Packet<'_>) -> Option<u64> {
        if packet.client_generated_cid {
            let hash = accepting_hash(peer, packet.dcid);
            let master_id = *self.conns_accepting.get(&hash)?;
            let conn = self.conns_by_id.get(&master_id)?;
            return conn
                .transport
                .is_destination(peer, packet)
                .then_some(master_id);
        }

        let cid = packet.cid?;
        if cid.node_id != 0 || cid.thread_id != 0 {
            // Minted by another instance or shard; not ours to handle.
            return None;
        }
        let conn = self.conns_by_id.get(&cid.master_id)?;
        conn.transport
            .is_destination(peer, packet)
            .then_some(cid.master_id)
    }

    /// Register a freshly attached transport connection.
    ///
    /// Opens the egress unidirectional streams, indexes the connection under
    /// its master-id (and its accepting-hash when server-side), and arms the
    /// timer.
    pub fn setup(
        &mut self,
        timers: &mut impl Timers,
        transport: E::Conn,
        events: Box<dyn Events>,
    ) -> Result<u64, Error> {
        let master_id = transport.master_id();
        let mut conn = Connection::setup(transport, self.qpack.clone(), events)?;

        if let Some(cid) = conn.transport.offered_cid() {
            let hash = accepting_hash(conn.transport.peer_addr(), cid);
            self.conns_accepting.insert(hash, master_id);
            conn.accept_hash = Some(hash);
        }

        trace!(master_id, server = conn.accept_hash.is_some(), "connection set up");
        self.conns_by_id.insert(master_id, conn);
        self.schedule_timer(timers, master_id);

        Ok(master_id)
    }

    /// Tear a connection down: unregister it, unlink its timer, and drop its
    /// codecs and transport handle. Returns false when already gone.
    pub fn dispose(&mut self, timers: &mut impl Timers, master_id: u64) -> bool {
        let Some(mut conn) = self.conns_by_id.remove(&master_id) else {
            return false;
        };

        if let Some(hash) = conn.accept_hash.take() {
            self.conns_accepting.remove(&hash);
        }
        if conn.h3.timer_deadline.take().is_some() {
            timers.unlink(master_id);
        }

        trace!(master_id, "connection disposed");
        conn.notify_destroy(master_id);
        true
    }

    /// Decode a batch of datagrams, group consecutive packets by
    /// `(peer, destination CID)`, and dispatch each group.
    ///
    /// Grouping keeps a connection's state hot across the packets of a single
    /// flight; groups may span datagrams as long as neither key changes.
    pub fn receive_datagrams<'a>(
        &mut self,
        timers: &mut impl Timers,
        datagrams: impl IntoIterator<Item = (SocketAddr, &'a [u8])>,
        out: &mut impl FnMut(Datagram),
    ) {
        let mut packets: Vec<Packet<'a>> = Vec::with_capacity(PACKET_BATCH);
        let mut decoded: Vec<Packet<'a>> = Vec::new();
        let mut key: Option<(SocketAddr, &'a [u8])> = None;

        for (peer, datagram) in datagrams {
            decoded.clear();
            self.endpoint.decode(datagram, &mut decoded);

            for packet in decoded.drain(..) {
                let packet_key = (peer, packet.dcid);
                if key != Some(packet_key) || packets.len() == PACKET_BATCH {
                    if let Some((group_peer, _)) = key {
                        if !packets.is_empty() {
                            self.process_packets(timers, group_peer, &packets, out);
                            packets.clear();
                        }
                    }
                    key = Some(packet_key);
                }
                packets.push(packet);
            }
        }

        if let Some((group_peer, _)) = key {
            if !packets.is_empty() {
                self.process_packets(timers, group_peer, &packets, out);
            }
        }
    }

    /// Deliver one group of same-destination packets, accepting a new
    /// connection on a miss, then immediately run the send path for whichever
    /// connection ended up involved.
    fn process_packets(
        &mut self,
        timers: &mut impl Timers,
        peer: SocketAddr,
        packets: &[Packet<'_>],
        out: &mut impl FnMut(Datagram),
    ) {
        let mut master_id = self.lookup(peer, &packets[0]);

        match master_id {
            Some(id) => {
                let now = timers.now();
                // Confirmed above; unwrap-free for the borrow checker's sake.
                if let Some(conn) = self.conns_by_id.get_mut(&id) {
                    for packet in packets {
                        Self::deliver(conn, now, peer, packet);
                    }
                }
            }
            None => {
                if let Some((transport, events)) = self.endpoint.accept(timers.now(), peer, packets)
                {
                    match self.setup(timers, transport, events) {
                        Ok(id) => master_id = Some(id),
                        Err(err) => warn!(%err, "failed to set up accepted connection"),
                    }
                }
            }
        }

        if let Some(id) = master_id {
            self.send_pending(timers, id, out);
        }
    }

    fn deliver(conn: &mut Connection<E::Conn>, now: Instant, peer: SocketAddr, packet: &Packet<'_>) {
        let mut events = Vec::new();
        if let Err(err) = conn.transport.receive(now, peer, packet, &mut events) {
            debug!(%err, "transport rejected packet");
            return;
        }

        for event in events {
            if let Err(err) = conn.dispatch(event) {
                warn!(%err, code = ?err.code(), "connection error");
                conn.transport.close(err.code(), &err.to_string());
                break;
            }
        }
    }

    /// Drain the transport's outbound packets for one connection and re-arm
    /// its timer.
    ///
    /// # Panics
    ///
    /// An unexpected transport error aborts the process: the transport's state
    /// is unknown and continuing would be worse.
    pub fn send_pending(
        &mut self,
        timers: &mut impl Timers,
        master_id: u64,
        out: &mut impl FnMut(Datagram),
    ) {
        let mut batch = Vec::with_capacity(SEND_BATCH);

        loop {
            let Some(conn) = self.conns_by_id.get_mut(&master_id) else {
                return;
            };

            batch.clear();
            let Connection { transport, h3, .. } = conn;
            match transport.emit(timers.now(), h3, &mut batch, SEND_BATCH) {
                Ok(Emitted::Packets) => {
                    let full = batch.len() == SEND_BATCH;
                    for datagram in batch.drain(..) {
                        out(datagram);
                    }
                    if !full {
                        break;
                    }
                }
                Ok(Emitted::Free) => {
                    self.dispose(timers, master_id);
                    return;
                }
                Err(err) => panic!("unrecoverable transport send failure: {err}"),
            }
        }

        self.schedule_timer(timers, master_id);
    }

    /// Re-arm the connection timer from the transport's next deadline.
    ///
    /// Linking to an unchanged deadline is a no-op; the event loop never sees
    /// redundant traffic.
    pub fn schedule_timer(&mut self, timers: &mut impl Timers, master_id: u64) {
        let Some(conn) = self.conns_by_id.get_mut(&master_id) else {
            return;
        };

        let deadline = conn.transport.next_timeout();
        if conn.h3.timer_deadline == deadline {
            return;
        }

        if conn.h3.timer_deadline.is_some() {
            timers.unlink(master_id);
        }
        if let Some(deadline) = deadline {
            timers.link(master_id, deadline);
        }
        conn.h3.timer_deadline = deadline;
    }

    /// The connection timer fired: run the send path, which also re-arms.
    pub fn on_timeout(
        &mut self,
        timers: &mut impl Timers,
        master_id: u64,
        out: &mut impl FnMut(Datagram),
    ) {
        if let Some(conn) = self.conns_by_id.get_mut(&master_id) {
            // The firing consumed the link.
            conn.h3.timer_deadline = None;
        }
        self.send_pending(timers, master_id, out);
    }
}
