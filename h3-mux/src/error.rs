use h3_mux_proto::{ErrorCode, FrameType};
use thiserror::Error;

use crate::qpack::QpackError;
use crate::transport::TransportError;

/// A connection-level protocol error.
///
/// Everything here tears the connection down; per-stream problems (an unknown
/// unidirectional stream type) are handled in place and never surface as an
/// [Error].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A control or QPACK stream was closed, reset, or stopped by the peer.
    #[error("critical stream closed")]
    ClosedCriticalStream,

    #[error("malformed frame of type {0:?}")]
    MalformedFrame(FrameType),

    #[error("malformed SETTINGS payload")]
    MalformedSettings,

    /// A second stream claimed an already-bound critical stream slot.
    #[error("duplicate critical stream")]
    WrongStreamCount,

    #[error(transparent)]
    Qpack(#[from] QpackError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl Error {
    /// The wire error code reported to the transport when closing.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ClosedCriticalStream => ErrorCode::CLOSED_CRITICAL_STREAM,
            Error::MalformedFrame(ty) => ErrorCode::malformed_frame(*ty),
            Error::MalformedSettings => ErrorCode::malformed_frame(FrameType::SETTINGS),
            Error::WrongStreamCount => ErrorCode::WRONG_STREAM_COUNT,
            Error::Qpack(_) => ErrorCode::QPACK_DECOMPRESSION_FAILED,
            Error::Transport(_) => ErrorCode::INTERNAL_ERROR,
        }
    }
}
