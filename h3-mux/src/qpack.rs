//! Seams for the QPACK codecs.
//!
//! The connection core only shovels bytes between the QPACK side-channel
//! streams and the codec implementation; the dynamic-table machinery lives
//! behind these traits. The one piece of QPACK wire format owned here is the
//! decoder-stream Stream Cancellation instruction, which the request layer
//! asks the connection to emit directly.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::transport::StreamId;

/// Header table size assumed until the peer's SETTINGS says otherwise.
pub const DEFAULT_HEADER_TABLE_SIZE: u64 = 4096;

// TODO make the blocked-streams limit negotiable instead of a constant.
pub const MAX_BLOCKED_STREAMS: u64 = 100;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("qpack decompression failed")]
pub struct QpackError;

/// Consumes the peer's encoder-stream instructions.
pub trait QpackDecoder: Send {
    /// Feed encoder-stream bytes, appending any request streams whose header
    /// blocks became decodable to `unblocked`.
    fn feed_encoder_stream(
        &mut self,
        bytes: &[u8],
        unblocked: &mut Vec<StreamId>,
    ) -> Result<(), QpackError>;
}

/// Consumes the peer's decoder-stream instructions: header acknowledgements,
/// stream cancellations, insert-count increments.
pub trait QpackEncoder: Send {
    fn feed_decoder_stream(&mut self, bytes: &[u8]) -> Result<(), QpackError>;
}

/// Creates the codec halves for a connection.
///
/// The decoder exists for the connection's whole life; the encoder is only
/// built once the peer's SETTINGS reveal the negotiated table size.
pub trait QpackFactory: Send + Sync {
    fn decoder(&self, header_table_size: u64, max_blocked: u64) -> Box<dyn QpackDecoder>;
    fn encoder(&self, header_table_size: u64) -> Box<dyn QpackEncoder>;
}

/// Codec stubs that discard every instruction.
///
/// Usable as long as neither side inserts into the dynamic table; plug a real
/// QPACK implementation into [QpackFactory] for anything beyond static-table
/// compression.
pub struct NullQpack;

struct NullDecoder;
struct NullEncoder;

impl QpackDecoder for NullDecoder {
    fn feed_encoder_stream(
        &mut self,
        _bytes: &[u8],
        _unblocked: &mut Vec<StreamId>,
    ) -> Result<(), QpackError> {
        Ok(())
    }
}

impl QpackEncoder for NullEncoder {
    fn feed_decoder_stream(&mut self, _bytes: &[u8]) -> Result<(), QpackError> {
        Ok(())
    }
}

impl QpackFactory for NullQpack {
    fn decoder(&self, _header_table_size: u64, _max_blocked: u64) -> Box<dyn QpackDecoder> {
        Box::new(NullDecoder)
    }

    fn encoder(&self, _header_table_size: u64) -> Box<dyn QpackEncoder> {
        Box::new(NullEncoder)
    }
}

/// Largest encoding of a Stream Cancellation instruction: the prefix byte plus
/// a 62-bit integer continuation.
pub const STREAM_CANCEL_MAX_SIZE: usize = 10;

/// Encode a decoder-stream Stream Cancellation instruction.
///
/// The instruction is a `01` two-bit pattern followed by the stream id as a
/// 6-bit prefix integer.
pub fn encode_stream_cancel(buf: &mut BytesMut, stream_id: StreamId) {
    buf.reserve(STREAM_CANCEL_MAX_SIZE);

    let mut value = stream_id.into_inner();
    if value < 0x3f {
        buf.put_u8(0x40 | value as u8);
        return;
    }

    buf.put_u8(0x40 | 0x3f);
    value -= 0x3f;
    while value >= 0x80 {
        buf.put_u8((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}
