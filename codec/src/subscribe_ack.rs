// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::qos::{PacketId, QoS};
use crate::var_int::encode_var_int;

/// Per-topic result of a SUBSCRIBE request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscribeAck {
    Success(QoS),
    Failed,
}

impl SubscribeAck {
    const fn to_byte(self) -> u8 {
        match self {
            Self::Success(qos) => qos as u8,
            Self::Failed => 0x80,
        }
    }

    fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        if byte == 0x80 {
            Ok(Self::Failed)
        } else {
            Ok(Self::Success(QoS::try_from(byte & 0b11)?))
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribeAckPacket {
    pub packet_id: PacketId,
    pub acks: Vec<SubscribeAck>,
}

impl SubscribeAckPacket {
    /// # Errors
    /// Returns [`DecodeError::OutOfRange`] if the body is short.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut ba = ByteArray::new(body);
        let packet_id = ba.read_u16()?;
        let mut acks = Vec::new();
        while !ba.is_empty() {
            acks.push(SubscribeAck::from_byte(ba.read_byte()?)?);
        }
        Ok(Self { packet_id, acks })
    }

    /// # Errors
    /// Returns [`EncodeError::TooLong`] if the encoded remaining length would
    /// exceed the varint limit.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.packet_id.to_be_bytes());
        for ack in &self.acks {
            body.push(ack.to_byte());
        }

        buf.push(0x90);
        encode_var_int(body.len(), buf)?;
        buf.extend_from_slice(&body);
        Ok(buf.len())
    }
}
