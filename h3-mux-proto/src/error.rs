use std::fmt;

use crate::FrameType;

/// An HTTP/3 application error code, as carried in RESET_STREAM, STOP_SENDING
/// and CONNECTION_CLOSE frames.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u64);

macro_rules! error_codes {
    {$($name:ident = $val:expr,)*} => {
        impl ErrorCode {
            $(pub const $name: ErrorCode = ErrorCode($val);)*
        }

        impl fmt::Debug for ErrorCode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.0 {
                    $($val => write!(f, stringify!($name)),)*
                    value if (0x100..0x200).contains(&value) => {
                        write!(f, "MALFORMED_FRAME({:?})", FrameType((value - 0x100) as u8))
                    }
                    value => write!(f, "UNKNOWN_ERROR [{value:#x}]"),
                }
            }
        }
    }
}

error_codes! {
    STOPPING = 0x00,
    NO_ERROR = 0x01,
    PUSH_REFUSED = 0x02,
    INTERNAL_ERROR = 0x03,
    PUSH_ALREADY_IN_CACHE = 0x04,
    REQUEST_CANCELLED = 0x05,
    INCOMPLETE_REQUEST = 0x06,
    CONNECT_ERROR = 0x07,
    EXCESSIVE_LOAD = 0x08,
    VERSION_FALLBACK = 0x09,
    WRONG_STREAM = 0x0a,
    LIMIT_EXCEEDED = 0x0b,
    DUPLICATE_PUSH = 0x0c,
    UNKNOWN_STREAM_TYPE = 0x0d,
    WRONG_STREAM_COUNT = 0x0e,
    CLOSED_CRITICAL_STREAM = 0x0f,
    WRONG_STREAM_DIRECTION = 0x10,
    EARLY_RESPONSE = 0x11,
    MISSING_SETTINGS = 0x12,
    UNEXPECTED_FRAME = 0x13,
    REQUEST_REJECTED = 0x14,
    GENERAL_PROTOCOL_ERROR = 0xff,
    QPACK_DECOMPRESSION_FAILED = 0x200,
}

impl ErrorCode {
    /// The frame-type-specific malformed-frame code (`0x100 + type`).
    pub const fn malformed_frame(ty: FrameType) -> Self {
        Self(0x100 + ty.0 as u64)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<ErrorCode> for u64 {
    fn from(code: ErrorCode) -> Self {
        code.0
    }
}
