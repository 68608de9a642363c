// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! The in-flight message representation shared by the session ledgers and
//! the topic index.

use std::time::{SystemTime, UNIX_EPOCH};

use codec::{PublishPacket, QoS};

/// Where a message sits in its QoS handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageState {
    Invalid,
    Publish,
    WaitForPubAck,
    WaitForPubRec,
    WaitForPubRel,
    WaitForPubComp,
}

#[derive(Clone, Debug)]
pub struct Message {
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
    pub packet_id: u16,
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: u64,
    pub state: MessageState,
}

impl Message {
    #[must_use]
    pub fn new(topic: impl Into<String>, qos: QoS, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            qos,
            dup: false,
            retain: false,
            packet_id: 0,
            topic: topic.into(),
            payload: payload.into(),
            timestamp: now(),
            state: MessageState::Invalid,
        }
    }

    /// Byte length of the on-wire variable header + payload: topic length
    /// prefix (2) + topic bytes + packet id (2, only for qos > 0) + payload.
    #[must_use]
    pub fn remaining_length(&self) -> usize {
        let packet_id_len = if self.qos == QoS::AtMostOnce { 0 } else { 2 };
        2 + self.topic.len() + packet_id_len + self.payload.len()
    }

    #[must_use]
    pub fn to_publish_packet(&self) -> PublishPacket {
        PublishPacket {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.clone(),
            packet_id: if self.qos == QoS::AtMostOnce {
                None
            } else {
                Some(self.packet_id)
            },
            payload: self.payload.clone(),
        }
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
