use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::{FrameType, VarInt};

/// Identifiers are 16 bits in this draft's SETTINGS encoding.
pub const SETTING_HEADER_TABLE_SIZE: u16 = 0x01;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("malformed SETTINGS payload")]
pub struct MalformedSettings;

/// Connection parameters carried by the first frame on the control stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: Option<VarInt>,
}

impl Settings {
    /// Parse a SETTINGS payload: a sequence of `(id, value)` pairs.
    ///
    /// Unknown identifiers are ignored; truncation anywhere is malformed.
    pub fn parse(mut payload: &[u8]) -> Result<Self, MalformedSettings> {
        let mut settings = Settings::default();

        while payload.has_remaining() {
            if payload.remaining() < 2 {
                return Err(MalformedSettings);
            }
            let id = payload.get_u16();
            let value = VarInt::decode(&mut payload).map_err(|_| MalformedSettings)?;

            match id {
                SETTING_HEADER_TABLE_SIZE => settings.header_table_size = Some(value),
                _ => (),
            }
        }

        Ok(settings)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        if let Some(value) = self.header_table_size {
            buf.put_u16(SETTING_HEADER_TABLE_SIZE);
            value.encode(buf);
        }
    }

    /// Encode a complete SETTINGS frame: length prefix, type byte, payload.
    pub fn encode_frame<B: BufMut>(&self, buf: &mut B) {
        // Encode to a temporary buffer so we can learn the length.
        let mut tmp = Vec::new();
        self.encode(&mut tmp);

        VarInt::from_u32(tmp.len() as u32).encode(buf);
        buf.put_u8(FrameType::SETTINGS.0);
        buf.put_slice(&tmp);
    }
}
