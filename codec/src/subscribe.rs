// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::qos::{PacketId, QoS};
use crate::var_int::encode_var_int;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribeTopic {
    pub topic: String,
    pub qos: QoS,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscribePacket {
    pub packet_id: PacketId,
    pub topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// # Errors
    /// Returns [`DecodeError::EmptyString`] if the topic filter list is
    /// empty.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut ba = ByteArray::new(body);
        let packet_id = ba.read_u16()?;

        let mut topics = Vec::new();
        while !ba.is_empty() {
            let topic = ba.read_string()?;
            let qos = QoS::try_from(ba.read_byte()? & 0b11)?;
            topics.push(SubscribeTopic { topic, qos });
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
            let len = topic.topic.len() as u16;
            body.extend_from_slice(&len.to_be_bytes());
            body.extend_from_slice(topic.topic.as_bytes());
            body.push(topic.qos as u8);
        }

        buf.push(0x82);
        encode_var_int(body.len(), buf)?;
        buf.extend_from_slice(&body);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_multiple_topics() {
        let packet = SubscribePacket {
            packet_id: 10,
            topics: vec![
                SubscribeTopic { topic: "a/+".to_string(), qos: QoS::AtMostOnce },
                SubscribeTopic { topic: "a/#".to_string(), qos: QoS::ExactlyOnce },
            ],
        };
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let frame = crate::fixed_header::parse_frame(&buf).unwrap().unwrap();
        let decoded = SubscribePacket::decode(frame.body).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn rejects_empty_topic_list() {
        let body = 1u16.to_be_bytes();
        assert_eq!(SubscribePacket::decode(&body), Err(DecodeError::EmptyString));
    }
}
