// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::qos::PacketId;
use crate::var_int::encode_var_int;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UnsubscribePacket {
    pub packet_id: PacketId,
    pub topics: Vec<String>,
}

impl UnsubscribePacket {
    /// # Errors
    /// Returns [`DecodeError::EmptyString`] if the topic filter list is
    /// empty.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut ba = ByteArray::new(body);
        let packet_id = ba.read_u16()?;

        let mut topics = Vec::new();
        while !ba.is_empty() {
            topics.push(ba.read_string()?);
        }
        if topics.is_empty() {
            return Err(DecodeError::EmptyString);
        }

        Ok(Self { packet_id, topics })
    }

    /// # Errors
    /// Returns [`EncodeError::TooLong`] if the encoded remaining length would
    /// exceed the varint limit.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.packet_id.to_be_bytes());
        for topic in &self.topics {
            let len = topic.len() as u16;
            body.extend_from_slice(&len.to_be_bytes());
            body.extend_from_slice(topic.as_bytes());
        }

        buf.push(0xA2);
        encode_var_int(body.len(), buf)?;
        buf.extend_from_slice(&body);
        Ok(buf.len())
    }
}
