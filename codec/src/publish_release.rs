// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::DecodeError;
use crate::qos::PacketId;

/// Second step of the QoS 2 handshake. The fixed header's flag nibble is
/// fixed at `0010`; anything else is malformed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PublishReleasePacket {
    pub packet_id: PacketId,
}

impl PublishReleasePacket {
    #[must_use]
    pub const fn new(packet_id: PacketId) -> Self {
        Self { packet_id }
    }

    pub fn encode(self, buf: &mut Vec<u8>) -> usize {
        buf.push(0x62);
        buf.push(0x02);
        buf.extend_from_slice(&self.packet_id.to_be_bytes());
        4
    }

    /// # Errors
    /// Returns [`DecodeError::InvalidPacketFlags`] if the reserved flag
    /// nibble isn't `0010`, or [`DecodeError::OutOfRange`] if the body is
    /// short.
    pub fn decode(flags: u8, body: &[u8]) -> Result<Self, DecodeError> {
        if flags != 0b0010 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let mut ba = ByteArray::new(body);
        Ok(Self { packet_id: ba.read_u16()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let packet = PublishReleasePacket::new(99);
        let mut buf = Vec::new();
        packet.encode(&mut buf);
        let frame = crate::fixed_header::parse_frame(&buf).unwrap().unwrap();
        assert_eq!(PublishReleasePacket::decode(frame.flags, frame.body).unwrap(), packet);
    }

    #[test]
    fn rejects_bad_flags() {
        assert_eq!(
            PublishReleasePacket::decode(0b0000, &[0, 1]),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
