use std::fmt;

use thiserror::Error;

use crate::VarInt;

/// An HTTP/3 frame type.
///
/// This draft encodes the type as a single byte following the length prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameType(pub u8);

macro_rules! frame_types {
    {$($name:ident = $val:expr,)*} => {
        impl FrameType {
            $(pub const $name: FrameType = FrameType($val);)*
        }

        impl fmt::Debug for FrameType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => write!(f, stringify!($name)),)*
                    value => write!(f, "UNKNOWN_FRAME [{value:#x}]"),
                }
            }
        }
    }
}

frame_types! {
    DATA = 0x00,
    HEADERS = 0x01,
    PRIORITY = 0x02,
    CANCEL_PUSH = 0x03,
    SETTINGS = 0x04,
    PUSH_PROMISE = 0x05,
    GOAWAY = 0x07,
    MAX_PUSH_ID = 0x0d,
    DUPLICATE_PUSH = 0x0e,
}

/// Frames other than DATA must declare a payload shorter than this.
pub const MAX_FRAME_PAYLOAD: u64 = 16384;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes buffered yet; retry once more arrive.
    #[error("incomplete frame")]
    Incomplete,

    #[error("malformed frame of type {0:?}")]
    Malformed(FrameType),
}

/// A single frame decoded from the front of a stream buffer.
///
/// `payload` borrows from the source slice. DATA frames report their declared
/// length but carry an empty payload here: the body is streamed by the request
/// layer rather than buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub ty: FrameType,
    pub length: u64,
    pub payload: &'a [u8],
    /// Bytes occupied by the length prefix and the type byte.
    pub header_size: usize,
}

impl<'a> Frame<'a> {
    /// Decode one frame from the front of `src`.
    ///
    /// A successful decode is stable under extension: appending bytes to `src`
    /// never changes the result.
    pub fn read(src: &'a [u8]) -> Result<Frame<'a>, FrameError> {
        let mut cursor = src;
        let length = VarInt::decode(&mut cursor)
            .map_err(|_| FrameError::Incomplete)?
            .into_inner();

        let [ty, rest @ ..] = cursor else {
            return Err(FrameError::Incomplete);
        };
        let ty = FrameType(*ty);
        let header_size = src.len() - rest.len();

        if ty == FrameType::DATA {
            // The body is consumed by whoever streams it; stop at the header.
            return Ok(Frame {
                ty,
                length,
                payload: &[],
                header_size,
            });
        }

        if length >= MAX_FRAME_PAYLOAD {
            return Err(FrameError::Malformed(ty));
        }
        let length = length as usize;
        if rest.len() < length {
            return Err(FrameError::Incomplete);
        }

        Ok(Frame {
            ty,
            length: length as u64,
            payload: &rest[..length],
            header_size,
        })
    }

    /// Total bytes to drop from the stream once the frame is handled.
    pub fn consumed(&self) -> usize {
        self.header_size + self.payload.len()
    }
}
