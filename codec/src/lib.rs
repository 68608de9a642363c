// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

//! Wire codec for MQTT 3.1.1 control packets.
//!
//! [`fixed_header::parse_frame`] pulls one complete packet's bytes off a
//! connection buffer; each packet module then decodes/encodes its own
//! variable header and payload.

pub mod byte_array;
pub mod connect;
pub mod connect_ack;
pub mod disconnect;
pub mod error;
pub mod fixed_header;
pub mod ping;
pub mod publish;
pub mod publish_ack;
pub mod publish_complete;
pub mod publish_received;
pub mod publish_release;
pub mod qos;
pub mod subscribe;
pub mod subscribe_ack;
pub mod topic;
pub mod unsubscribe;
pub mod unsubscribe_ack;
pub mod var_int;

pub use byte_array::ByteArray;
pub use connect::{ConnectFlags, ConnectPacket};
pub use connect_ack::{ConnectAckPacket, ConnectReturnCode};
pub use disconnect::DisconnectPacket;
pub use error::{DecodeError, EncodeError};
pub use fixed_header::{parse_frame, Frame, PacketType};
pub use ping::{PingRequestPacket, PingResponsePacket};
pub use publish::PublishPacket;
pub use publish_ack::PublishAckPacket;
pub use publish_complete::PublishCompletePacket;
pub use publish_received::PublishReceivedPacket;
pub use publish_release::PublishReleasePacket;
pub use qos::{PacketId, QoS};
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use subscribe_ack::{SubscribeAck, SubscribeAckPacket};
pub use unsubscribe::UnsubscribePacket;
pub use unsubscribe_ack::UnsubscribeAckPacket;
pub use var_int::{decode_var_int, encode_var_int, MAX_REMAINING_LENGTH};
