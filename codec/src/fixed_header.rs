// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use crate::byte_array::ByteArray;
use crate::error::DecodeError;
use crate::var_int::decode_var_int;

/// High nibble of the first fixed-header byte (CONNECT=1 .. DISCONNECT=14).
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PacketType {
    Connect = 1,
    ConnectAck = 2,
    Publish = 3,
    PublishAck = 4,
    PublishReceived = 5,
    PublishRelease = 6,
    PublishComplete = 7,
    Subscribe = 8,
    SubscribeAck = 9,
    Unsubscribe = 10,
    UnsubscribeAck = 11,
    PingRequest = 12,
    PingResponse = 13,
    Disconnect = 14,
}

impl PacketType {
    #[must_use]
    pub const fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            1 => Some(Self::Connect),
            2 => Some(Self::ConnectAck),
            3 => Some(Self::Publish),
            4 => Some(Self::PublishAck),
            5 => Some(Self::PublishReceived),
            6 => Some(Self::PublishRelease),
            7 => Some(Self::PublishComplete),
            8 => Some(Self::Subscribe),
            9 => Some(Self::SubscribeAck),
            10 => Some(Self::Unsubscribe),
            11 => Some(Self::UnsubscribeAck),
            12 => Some(Self::PingRequest),
            13 => Some(Self::PingResponse),
            14 => Some(Self::Disconnect),
            _ => None,
        }
    }
}

/// A fully-framed packet found at the front of the input buffer.
#[derive(Debug)]
pub struct Frame<'a> {
    pub packet_type: PacketType,
    pub flags: u8,
    pub body: &'a [u8],
    /// Total bytes occupied by this packet (fixed header + body); the caller
    /// advances its cursor by this much.
    pub consumed: usize,
}

/// Look for one complete MQTT packet at the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some(frame))` when a
/// full packet is available, and `Err` when the framing itself is malformed
/// (the caller must close the connection; this function never does).
///
/// # Errors
/// Returns [`DecodeError::InvalidVarInt`] if the remaining-length varint
/// would need a fifth continuation byte, or [`DecodeError::InvalidPacketType`]
/// if the high nibble is not one of the fourteen known packet types.
pub fn parse_frame(buf: &[u8]) -> Result<Option<Frame<'_>>, DecodeError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let first_byte = buf[0];
    let nibble = (first_byte & 0xf0) >> 4;
    let flags = first_byte & 0x0f;
    let packet_type = PacketType::from_nibble(nibble).ok_or(DecodeError::InvalidPacketType)?;

    // Decode the varint speculatively: `read_byte` reports OutOfRange (not a
    // framing error) when we simply haven't received enough bytes yet.
    let mut ba = ByteArray::new(&buf[1..]);
    let (remaining_length, var_int_len) = match decode_var_int(&mut ba) {
        Ok(pair) => pair,
        Err(DecodeError::OutOfRange) => return Ok(None),
        Err(err) => return Err(err),
    };

    let header_len = 1 + var_int_len;
    let total_len = header_len + remaining_length;
    if buf.len() < total_len {
        return Ok(None);
    }

    Ok(Some(Frame {
        packet_type,
        flags,
        body: &buf[header_len..total_len],
        consumed: total_len,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_need_more_bytes() {
        assert!(parse_frame(&[]).unwrap().is_none());
        assert!(parse_frame(&[0xd0]).unwrap().is_none());
        assert!(parse_frame(&[0x30, 0x05, 0x00]).unwrap().is_none());
    }

    #[test]
    fn parses_a_complete_pingreq() {
        let buf = [0xc0, 0x00];
        let frame = parse_frame(&buf).unwrap().unwrap();
        assert_eq!(frame.packet_type, PacketType::PingRequest);
        assert_eq!(frame.consumed, 2);
        assert!(frame.body.is_empty());
    }

    #[test]
    fn rejects_five_continuation_bytes() {
        let buf = [0x30, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert_eq!(parse_frame(&buf), Err(DecodeError::InvalidVarInt));
    }

    #[test]
    fn rejects_unknown_packet_type() {
        let buf = [0x00, 0x00];
        assert_eq!(parse_frame(&buf), Err(DecodeError::InvalidPacketType));
    }
}
