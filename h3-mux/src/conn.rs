use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use h3_mux_proto::{ErrorCode, Frame, FrameError, FrameType, Settings, UniStreamType, VarInt};
use tracing::trace;

use crate::buffer::{ReceiveBuffer, SendBuffer};
use crate::error::Error;
use crate::qpack::{
    self, QpackDecoder, QpackEncoder, QpackFactory, DEFAULT_HEADER_TABLE_SIZE, MAX_BLOCKED_STREAMS,
};
use crate::transport::{EgressSource, StreamEvent, StreamId, Transport};

/// Callbacks a connection raises toward the request layer.
pub trait Events: Send {
    /// A frame arrived on the peer's control stream. SETTINGS has already been
    /// applied to the connection when it reaches this hook.
    fn on_control_frame(&mut self, frame: &Frame<'_>) -> Result<(), Error>;

    /// The connection is being torn down; its state is gone once this returns.
    fn on_destroy(&mut self, master_id: u64);

    /// Request streams whose header blocks became decodable.
    // TODO(qpack): resuming the listed streams is not wired through yet.
    fn on_qpack_unblocked(&mut self, _streams: &[StreamId]) {}
}

/// The input handler an ingress unidirectional stream is currently in.
///
/// `Unknown` lasts for exactly one byte: the stream type commits the stream to
/// a role for the rest of its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamRole {
    Unknown,
    Control,
    QpackEncoder,
    QpackDecoder,
    /// Unrecognized type: swallow everything after STOP_SENDING.
    Discard,
}

struct IngressStream {
    recv: ReceiveBuffer,
    role: StreamRole,
}

impl IngressStream {
    fn new() -> Self {
        Self {
            recv: ReceiveBuffer::default(),
            role: StreamRole::Unknown,
        }
    }
}

pub(crate) struct EgressStream {
    pub(crate) id: StreamId,
    pub(crate) buf: SendBuffer,
}

impl EgressStream {
    fn open<T: Transport>(transport: &mut T, preamble: &[u8]) -> Result<Self, Error> {
        let id = transport.open_uni()?;
        let mut buf = SendBuffer::default();
        buf.append(preamble);
        Ok(Self { id, buf })
    }
}

/// Everything of a connection that is not the transport handle itself.
///
/// Kept separate so the transport can pull egress bytes through
/// [EgressSource] while the caller still holds the handle.
pub(crate) struct H3State {
    events: Box<dyn Events>,
    qpack: Arc<dyn QpackFactory>,
    qpack_dec: Box<dyn QpackDecoder>,
    qpack_enc: Option<Box<dyn QpackEncoder>>,
    settings_received: bool,

    ingress: HashMap<StreamId, IngressStream>,
    ingress_control: Option<StreamId>,
    ingress_qpack_encoder: Option<StreamId>,
    ingress_qpack_decoder: Option<StreamId>,

    pub(crate) egress_control: EgressStream,
    pub(crate) egress_qpack_encoder: EgressStream,
    pub(crate) egress_qpack_decoder: EgressStream,

    /// The deadline the connection timer is currently linked to.
    pub(crate) timer_deadline: Option<Instant>,

    // Scratch reused across QPACK feeds.
    unblocked: Vec<StreamId>,
}

impl H3State {
    fn egress_mut(&mut self, id: StreamId) -> Option<&mut EgressStream> {
        [
            &mut self.egress_control,
            &mut self.egress_qpack_encoder,
            &mut self.egress_qpack_decoder,
        ]
        .into_iter()
        .find(|stream| stream.id == id)
    }
}

impl EgressSource for H3State {
    fn emit(&mut self, id: StreamId, offset: usize, dst: &mut [u8]) -> (usize, bool) {
        match self.egress_mut(id) {
            Some(stream) => stream.buf.emit(offset, dst),
            None => (0, true),
        }
    }

    fn shift(&mut self, id: StreamId, delta: usize) {
        match self.egress_mut(id) {
            Some(stream) => stream.buf.shift(delta),
            None => trace!(?id, "shift on unknown egress stream"),
        }
    }
}

/// One HTTP/3 connection: a transport handle plus the framing state above it.
pub struct Connection<T: Transport> {
    pub(crate) transport: T,
    pub(crate) h3: H3State,
    /// The accepting-map key this connection is registered under, if any.
    pub(crate) accept_hash: Option<u64>,
}

impl<T: Transport> Connection<T> {
    /// Attach the framing state to a fresh transport handle.
    ///
    /// Creates the QPACK decoder and opens the three egress unidirectional
    /// streams: the control stream leads with its type byte and an empty
    /// SETTINGS frame, the QPACK side channels with just their type byte.
    pub(crate) fn setup(
        mut transport: T,
        qpack: Arc<dyn QpackFactory>,
        events: Box<dyn Events>,
    ) -> Result<Self, Error> {
        let qpack_dec = qpack.decoder(DEFAULT_HEADER_TABLE_SIZE, MAX_BLOCKED_STREAMS);

        let mut control_preamble = BytesMut::with_capacity(4);
        control_preamble.extend_from_slice(&[UniStreamType::Control.type_byte()]);
        Settings::default().encode_frame(&mut control_preamble);

        let egress_control = EgressStream::open(&mut transport, &control_preamble)?;
        let egress_qpack_encoder =
            EgressStream::open(&mut transport, &[UniStreamType::QpackEncoder.type_byte()])?;
        let egress_qpack_decoder =
            EgressStream::open(&mut transport, &[UniStreamType::QpackDecoder.type_byte()])?;

        for id in [
            egress_control.id,
            egress_qpack_encoder.id,
            egress_qpack_decoder.id,
        ] {
            transport.sync_send(id);
        }

        Ok(Self {
            transport,
            h3: H3State {
                events,
                qpack,
                qpack_dec,
                qpack_enc: None,
                settings_received: false,
                ingress: HashMap::new(),
                ingress_control: None,
                ingress_qpack_encoder: None,
                ingress_qpack_decoder: None,
                egress_control,
                egress_qpack_encoder,
                egress_qpack_decoder,
                timer_deadline: None,
                unblocked: Vec::new(),
            },
            accept_hash: None,
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether the peer's SETTINGS frame has arrived.
    pub fn has_received_settings(&self) -> bool {
        self.h3.settings_received
    }

    /// Apply one stream event reported by the transport.
    ///
    /// An `Err` is a connection error; the caller closes the transport with
    /// [Error::code].
    pub fn dispatch(&mut self, event: StreamEvent) -> Result<(), Error> {
        match event {
            StreamEvent::UniOpen { id } => {
                self.h3.ingress.insert(id, IngressStream::new());
                Ok(())
            }
            StreamEvent::Data { id, offset, data } => self.on_receive(id, offset, &data),
            StreamEvent::ReceiveReset { id, code } => {
                trace!(?id, code, "ingress unistream reset");
                Err(Error::ClosedCriticalStream)
            }
            StreamEvent::SendShift { id, delta } => {
                self.h3.shift(id, delta);
                Ok(())
            }
            StreamEvent::SendStop { id, code } => {
                trace!(?id, code, "egress unistream stopped");
                Err(Error::ClosedCriticalStream)
            }
            StreamEvent::Destroy { id } => {
                self.h3.ingress.remove(&id);
                Ok(())
            }
        }
    }

    fn on_receive(&mut self, id: StreamId, offset: u64, data: &[u8]) -> Result<(), Error> {
        let Some(mut stream) = self.h3.ingress.remove(&id) else {
            trace!(?id, "receive on unknown unistream");
            return Ok(());
        };

        // Detached from the map so the handlers below can borrow state freely.
        let result = self.process_ingress(id, &mut stream, offset, data);
        self.h3.ingress.insert(id, stream);
        result
    }

    fn process_ingress(
        &mut self,
        id: StreamId,
        stream: &mut IngressStream,
        offset: u64,
        data: &[u8],
    ) -> Result<(), Error> {
        stream.recv.splice(offset, data);

        // Every discovered unistream is critical: a FIN is as fatal as a reset.
        if self.transport.recv_complete(id) {
            return Err(Error::ClosedCriticalStream);
        }

        let available = self.transport.recv_window(id).min(stream.recv.len());
        if available == 0 {
            return Ok(());
        }

        let mut consumed = 0;
        while consumed < available {
            let window = &stream.recv.as_slice()[consumed..available];
            match stream.role {
                StreamRole::Unknown => {
                    // One byte commits the role; re-enter it with the rest.
                    let byte = window[0];
                    consumed += 1;
                    stream.role = self.classify(id, byte)?;
                }
                StreamRole::Control => {
                    consumed += self.handle_control(window)?;
                    break;
                }
                StreamRole::QpackEncoder => {
                    self.feed_qpack_decoder(window)?;
                    consumed += window.len();
                    break;
                }
                StreamRole::QpackDecoder => {
                    consumed += self.feed_qpack_encoder(window)?;
                    break;
                }
                StreamRole::Discard => {
                    consumed += window.len();
                    break;
                }
            }
        }

        if consumed > 0 {
            stream.recv.consume(consumed);
            self.transport.consume_recv(id, consumed);
        }

        Ok(())
    }

    fn classify(&mut self, id: StreamId, byte: u8) -> Result<StreamRole, Error> {
        let Some(ty) = UniStreamType::classify(byte) else {
            trace!(?id, byte, "unknown unistream type");
            self.transport
                .stop_sending(id, ErrorCode::UNKNOWN_STREAM_TYPE);
            return Ok(StreamRole::Discard);
        };

        let (slot, role) = match ty {
            UniStreamType::Control => (&mut self.h3.ingress_control, StreamRole::Control),
            UniStreamType::QpackEncoder => {
                (&mut self.h3.ingress_qpack_encoder, StreamRole::QpackEncoder)
            }
            UniStreamType::QpackDecoder => {
                (&mut self.h3.ingress_qpack_decoder, StreamRole::QpackDecoder)
            }
        };

        if slot.replace(id).is_some() {
            return Err(Error::WrongStreamCount);
        }

        trace!(?id, ?ty, "ingress unistream bound");
        Ok(role)
    }

    /// Read frames off the control stream until the buffered bytes run dry.
    ///
    /// Returns how many bytes were consumed; an incomplete trailing frame
    /// stays buffered for the next delivery.
    fn handle_control(&mut self, src: &[u8]) -> Result<usize, Error> {
        let mut consumed = 0;

        loop {
            let frame = match Frame::read(&src[consumed..]) {
                Ok(frame) => frame,
                Err(FrameError::Incomplete) => break,
                Err(FrameError::Malformed(ty)) => return Err(Error::MalformedFrame(ty)),
            };

            if frame.ty == FrameType::DATA {
                return Err(Error::MalformedFrame(FrameType::DATA));
            }

            // SETTINGS must come first and must not repeat.
            if self.h3.settings_received == (frame.ty == FrameType::SETTINGS) {
                return Err(Error::MalformedFrame(frame.ty));
            }

            if frame.ty == FrameType::SETTINGS {
                self.handle_settings(frame.payload)?;
            }

            self.h3.events.on_control_frame(&frame)?;
            consumed += frame.consumed();
        }

        Ok(consumed)
    }

    fn handle_settings(&mut self, payload: &[u8]) -> Result<(), Error> {
        debug_assert!(!self.h3.settings_received);

        let settings = Settings::parse(payload).map_err(|_| Error::MalformedSettings)?;
        self.h3.settings_received = true;

        let table_size = settings
            .header_table_size
            .map(VarInt::into_inner)
            .unwrap_or(DEFAULT_HEADER_TABLE_SIZE);
        self.h3.qpack_enc = Some(self.h3.qpack.encoder(table_size));

        trace!(table_size, "peer SETTINGS applied");
        Ok(())
    }

    fn feed_qpack_decoder(&mut self, src: &[u8]) -> Result<(), Error> {
        let h3 = &mut self.h3;
        h3.unblocked.clear();
        h3.qpack_dec.feed_encoder_stream(src, &mut h3.unblocked)?;

        if !h3.unblocked.is_empty() {
            h3.events.on_qpack_unblocked(&h3.unblocked);
        }

        Ok(())
    }

    fn feed_qpack_encoder(&mut self, src: &[u8]) -> Result<usize, Error> {
        // Decoder-stream instructions are only meaningful once the encoder
        // exists (after SETTINGS); until then leave the bytes buffered.
        match &mut self.h3.qpack_enc {
            Some(encoder) => {
                encoder.feed_decoder_stream(src)?;
                Ok(src.len())
            }
            None => Ok(0),
        }
    }

    /// Queue a QPACK Stream Cancellation for `stream_id` on the decoder side
    /// channel and tell the transport about the new bytes.
    pub fn send_qpack_stream_cancel(&mut self, stream_id: StreamId) {
        let stream = &mut self.h3.egress_qpack_decoder;
        qpack::encode_stream_cancel(stream.buf.bytes_mut(), stream_id);
        self.transport.sync_send(stream.id);
    }

    /// Append pre-encoded header-acknowledgement bytes to the encoder side
    /// channel and tell the transport about them.
    pub fn send_qpack_header_ack(&mut self, bytes: &[u8]) {
        let stream = &mut self.h3.egress_qpack_encoder;
        stream.buf.append(bytes);
        self.transport.sync_send(stream.id);
    }

    pub(crate) fn notify_destroy(&mut self, master_id: u64) {
        self.h3.events.on_destroy(master_id);
    }
}
