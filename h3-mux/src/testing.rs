//! Test doubles for the transport, codec and event-loop seams.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use h3_mux_proto::{ErrorCode, Frame};

use crate::conn::Events;
use crate::error::Error;
use crate::qpack::{QpackDecoder, QpackEncoder, QpackError, QpackFactory};
use crate::transport::{
    Datagram, EgressSource, Emitted, Endpoint, Packet, StreamEvent, StreamId, Timers, Transport,
    TransportError,
};

/// One scripted response to a [Transport::emit] call.
#[derive(Debug, Clone)]
pub(crate) enum EmitStep {
    Packets(usize),
    Free,
}

pub(crate) struct MockTransport {
    pub master_id: u64,
    pub peer: SocketAddr,
    pub offered_cid: Option<Vec<u8>>,
    pub destined: bool,
    pub next_timeout: Option<Instant>,

    next_uni_id: u64,
    pub opened: Vec<StreamId>,
    pub synced: Vec<StreamId>,
    pub stopped: Vec<(StreamId, ErrorCode)>,
    pub consumed: HashMap<StreamId, usize>,
    pub complete: HashSet<StreamId>,
    pub windows: HashMap<StreamId, usize>,
    pub closed: Option<(u64, String)>,
    pub received: Vec<Vec<u8>>,
    pub queued_events: VecDeque<Vec<StreamEvent>>,
    pub emit_script: VecDeque<EmitStep>,
}

impl MockTransport {
    pub fn server(master_id: u64, peer: SocketAddr, offered_cid: Vec<u8>) -> Self {
        Self {
            master_id,
            peer,
            offered_cid: Some(offered_cid),
            destined: true,
            next_timeout: None,
            // Server-initiated unidirectional stream ids.
            next_uni_id: 3,
            opened: Vec::new(),
            synced: Vec::new(),
            stopped: Vec::new(),
            consumed: HashMap::new(),
            complete: HashSet::new(),
            windows: HashMap::new(),
            closed: None,
            received: Vec::new(),
            queued_events: VecDeque::new(),
            emit_script: VecDeque::new(),
        }
    }

    pub fn consumed_on(&self, id: StreamId) -> usize {
        self.consumed.get(&id).copied().unwrap_or(0)
    }
}

impl Transport for MockTransport {
    fn receive(
        &mut self,
        _now: Instant,
        _peer: SocketAddr,
        packet: &Packet<'_>,
        events: &mut Vec<StreamEvent>,
    ) -> Result<(), TransportError> {
        self.received.push(packet.data.to_vec());
        if let Some(queued) = self.queued_events.pop_front() {
            events.extend(queued);
        }
        Ok(())
    }

    fn is_destination(&self, _peer: SocketAddr, _packet: &Packet<'_>) -> bool {
        self.destined
    }

    fn open_uni(&mut self) -> Result<StreamId, TransportError> {
        let id = StreamId::new(self.next_uni_id);
        self.next_uni_id += 4;
        self.opened.push(id);
        Ok(id)
    }

    fn sync_send(&mut self, id: StreamId) {
        self.synced.push(id);
    }

    fn recv_window(&self, id: StreamId) -> usize {
        // Everything delivered is contiguous unless a test says otherwise.
        self.windows.get(&id).copied().unwrap_or(usize::MAX)
    }

    fn recv_complete(&self, id: StreamId) -> bool {
        self.complete.contains(&id)
    }

    fn consume_recv(&mut self, id: StreamId, n: usize) {
        *self.consumed.entry(id).or_default() += n;
    }

    fn stop_sending(&mut self, id: StreamId, code: ErrorCode) {
        self.stopped.push((id, code));
    }

    fn emit(
        &mut self,
        _now: Instant,
        _src: &mut dyn EgressSource,
        out: &mut Vec<Datagram>,
        max: usize,
    ) -> Result<Emitted, TransportError> {
        match self.emit_script.pop_front() {
            None => Ok(Emitted::Packets),
            Some(EmitStep::Packets(n)) => {
                for _ in 0..n.min(max) {
                    out.push(Datagram {
                        dest: self.peer,
                        data: Bytes::from_static(b"out"),
                    });
                }
                Ok(Emitted::Packets)
            }
            Some(EmitStep::Free) => Ok(Emitted::Free),
        }
    }

    fn next_timeout(&self) -> Option<Instant> {
        self.next_timeout
    }

    fn master_id(&self) -> u64 {
        self.master_id
    }

    fn offered_cid(&self) -> Option<&[u8]> {
        self.offered_cid.as_deref()
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn close(&mut self, code: ErrorCode, reason: &str) {
        self.closed = Some((code.0, reason.to_string()));
    }
}

/// Decodes one packet per datagram (the leading byte is the CID) and records
/// every accept-path group it is offered.
#[derive(Default)]
pub(crate) struct MockEndpoint {
    pub groups: Arc<Mutex<Vec<(SocketAddr, Vec<Vec<u8>>)>>>,
    pub accept_next: VecDeque<MockTransport>,
}

impl Endpoint for MockEndpoint {
    type Conn = MockTransport;

    fn decode<'a>(&mut self, datagram: &'a [u8], out: &mut Vec<Packet<'a>>) {
        if datagram.is_empty() {
            return;
        }
        out.push(Packet {
            data: datagram,
            dcid: &datagram[..1],
            client_generated_cid: true,
            cid: None,
        });
    }

    fn accept(
        &mut self,
        _now: Instant,
        peer: SocketAddr,
        packets: &[Packet<'_>],
    ) -> Option<(MockTransport, Box<dyn Events>)> {
        self.groups
            .lock()
            .unwrap()
            .push((peer, packets.iter().map(|p| p.dcid.to_vec()).collect()));

        let transport = self.accept_next.pop_front()?;
        Some((transport, Box::new(RecordingEvents(EventLog::default()))))
    }
}

pub(crate) struct MockTimers {
    pub now: Instant,
    pub links: Vec<(u64, Instant)>,
    pub unlinks: Vec<u64>,
}

impl Default for MockTimers {
    fn default() -> Self {
        Self {
            now: Instant::now(),
            links: Vec::new(),
            unlinks: Vec::new(),
        }
    }
}

impl Timers for MockTimers {
    fn now(&self) -> Instant {
        self.now
    }

    fn link(&mut self, master_id: u64, deadline: Instant) {
        self.links.push((master_id, deadline));
    }

    fn unlink(&mut self, master_id: u64) {
        self.unlinks.push(master_id);
    }
}

#[derive(Default, Clone)]
pub(crate) struct EventLog {
    pub control_frames: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    pub destroyed: Arc<Mutex<Vec<u64>>>,
    pub unblocked: Arc<Mutex<Vec<StreamId>>>,
}

pub(crate) struct RecordingEvents(pub EventLog);

impl Events for RecordingEvents {
    fn on_control_frame(&mut self, frame: &Frame<'_>) -> Result<(), Error> {
        self.0
            .control_frames
            .lock()
            .unwrap()
            .push((frame.ty.0, frame.payload.to_vec()));
        Ok(())
    }

    fn on_destroy(&mut self, master_id: u64) {
        self.0.destroyed.lock().unwrap().push(master_id);
    }

    fn on_qpack_unblocked(&mut self, streams: &[StreamId]) {
        self.0.unblocked.lock().unwrap().extend_from_slice(streams);
    }
}

#[derive(Default, Clone)]
pub(crate) struct QpackLog {
    /// `(header_table_size, max_blocked)` per decoder built.
    pub decoders: Arc<Mutex<Vec<(u64, u64)>>>,
    /// Header table size per encoder built.
    pub encoders: Arc<Mutex<Vec<u64>>>,
    pub encoder_feed: Arc<Mutex<Vec<Vec<u8>>>>,
    pub decoder_feed: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Stream ids the next encoder-stream feed reports as unblocked.
    pub unblock_next: Arc<Mutex<Vec<StreamId>>>,
}

#[derive(Default)]
pub(crate) struct RecordingQpack(pub QpackLog);

struct RecordingDecoder(QpackLog);
struct RecordingEncoder(QpackLog);

impl QpackDecoder for RecordingDecoder {
    fn feed_encoder_stream(
        &mut self,
        bytes: &[u8],
        unblocked: &mut Vec<StreamId>,
    ) -> Result<(), QpackError> {
        self.0.encoder_feed.lock().unwrap().push(bytes.to_vec());
        unblocked.append(&mut self.0.unblock_next.lock().unwrap());
        Ok(())
    }
}

impl QpackEncoder for RecordingEncoder {
    fn feed_decoder_stream(&mut self, bytes: &[u8]) -> Result<(), QpackError> {
        self.0.decoder_feed.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }
}

impl QpackFactory for RecordingQpack {
    fn decoder(&self, header_table_size: u64, max_blocked: u64) -> Box<dyn QpackDecoder> {
        self.0
            .decoders
            .lock()
            .unwrap()
            .push((header_table_size, max_blocked));
        Box::new(RecordingDecoder(self.0.clone()))
    }

    fn encoder(&self, header_table_size: u64) -> Box<dyn QpackEncoder> {
        self.0.encoders.lock().unwrap().push(header_table_size);
        Box::new(RecordingEncoder(self.0.clone()))
    }
}
