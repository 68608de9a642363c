// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::qos::{PacketId, QoS};
use crate::var_int::encode_var_int;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PublishPacket {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub packet_id: Option<PacketId>,
    pub payload: Vec<u8>,
}

impl PublishPacket {
    /// Split the fixed-header flags byte into dup/qos/retain.
    ///
    /// # Errors
    /// Returns [`DecodeError::InvalidQoS`] if the qos bits carry the reserved
    /// value `3`.
    pub fn decode(flags: u8, body: &[u8]) -> Result<Self, DecodeError> {
        let dup = flags & 0b1000 != 0;
        let retain = flags & 0b0001 != 0;
        let qos = QoS::try_from((flags & 0b0110) >> 1)?;

        let mut ba = ByteArray::new(body);
        let topic = ba.read_string()?;
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            Some(ba.read_u16()?)
        };
        let payload = ba.read_remaining();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }

    #[must_use]
    pub const fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.dup {
            flags |= 0b1000;
        }
        flags |= (self.qos as u8) << 1;
        if self.retain {
            flags |= 0b0001;
        }
        flags
    }

    /// # Errors
    /// Returns [`EncodeError::TooLong`] if the encoded remaining length would
    /// exceed the varint limit.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        let topic_len = self.topic.len() as u16;
        body.extend_from_slice(&topic_len.to_be_bytes());
        body.extend_from_slice(self.topic.as_bytes());
        if let Some(packet_id) = self.packet_id {
            body.extend_from_slice(&packet_id.to_be_bytes());
        }
        body.extend_from_slice(&self.payload);

        buf.push(0x30 | self.flags());
        encode_var_int(body.len(), buf)?;
        buf.extend_from_slice(&body);
        Ok(buf.len())
    }
}
