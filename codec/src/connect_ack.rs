// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::DecodeError;

#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectReturnCode {
    Accepted = 0x00,
    RefusedProtocolVersion = 0x01,
    RefusedIdentifierRejected = 0x02,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ConnectAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnectAckPacket {
    #[must_use]
    pub const fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        Self { session_present, return_code }
    }

    pub fn encode(self, buf: &mut Vec<u8>) -> usize {
        buf.push(0x20);
        buf.push(0x02);
        buf.push(u8::from(self.session_present));
        buf.push(self.return_code as u8);
        4
    }

    /// # Errors
    /// Returns [`DecodeError::OutOfRange`] if the body is short.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut ba = ByteArray::new(body);
        let ack_flags = ba.read_byte()?;
        let code = ba.read_byte()?;
        let return_code = match code {
            0x00 => ConnectReturnCode::Accepted,
            0x01 => ConnectReturnCode::RefusedProtocolVersion,
            0x02 => ConnectReturnCode::RefusedIdentifierRejected,
            _ => return Err(DecodeError::InvalidPacketType),
        };
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            return_code,
        })
    }
}
