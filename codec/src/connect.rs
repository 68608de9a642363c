// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by GNU Lesser General Public License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};

use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::qos::QoS;
use crate::var_int::encode_var_int;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL_V311: u8 = 4;

/// Flags carried in the CONNECT variable header's eighth byte.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ConnectFlags {
    pub clean_session: bool,
    pub will: bool,
    pub will_qos: QoS,
    pub will_retain: bool,
    pub password: bool,
    pub username: bool,
}

impl ConnectFlags {
    /// # Errors
    /// Returns [`DecodeError::InvalidConnectFlags`] if the reserved bit 0 is
    /// set, or [`DecodeError::InvalidQoS`] if `will_qos` carries `3`.
    pub fn decode(byte: u8) -> Result<Self, DecodeError> {
        if byte & 0x01 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }
        let will_qos = QoS::try_from((byte & 0b0001_1000) >> 3)?;
        Ok(Self {
            clean_session: byte & 0b0000_0010 != 0,
            will: byte & 0b0000_0100 != 0,
            will_qos,
            will_retain: byte & 0b0010_0000 != 0,
            password: byte & 0b0100_0000 != 0,
            username: byte & 0b1000_0000 != 0,
        })
    }

    #[must_use]
    pub fn encode(self) -> u8 {
        let mut byte = 0u8;
        if self.clean_session {
            byte |= 0b0000_0010;
        }
        if self.will {
            byte |= 0b0000_0100;
        }
        byte |= u8::from(self.will_qos) << 3;
        if self.will_retain {
            byte |= 0b0010_0000;
        }
        if self.password {
            byte |= 0b0100_0000;
        }
        if self.username {
            byte |= 0b1000_0000;
        }
        byte
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectPacket {
    pub flags: ConnectFlags,
    pub keep_alive: u16,
    pub client_id: String,
    pub will_topic: Option<String>,
    pub will_payload: Vec<u8>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl ConnectPacket {
    /// Decode the CONNECT variable header and payload. An empty `client_id`
    /// is rejected; a zero-length will payload is accepted.
    ///
    /// # Errors
    /// See [`DecodeError`] variants for the individual protocol violations
    /// this rejects.
    pub fn decode(body: &[u8]) -> Result<Self, DecodeError> {
        let mut ba = ByteArray::new(body);

        let protocol_name = ba.read_string()?;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ba.read_byte()?;
        if protocol_level != PROTOCOL_LEVEL_V311 {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let flags = ConnectFlags::decode(ba.read_byte()?)?;
        let keep_alive = ba.read_u16()?;

        let client_id = ba.read_string()?;
        if client_id.is_empty() {
            return Err(DecodeError::EmptyClientId);
        }

        let (will_topic, will_payload) = if flags.will {
            let topic = ba.read_string()?;
            if topic.is_empty() {
                return Err(DecodeError::EmptyString);
            }
            let len = ba.read_u16()? as usize;
            let payload = ba.read_bytes(len)?.to_vec();
            (Some(topic), payload)
        } else {
            (None, Vec::new())
        };

        // The username/password flags are independent: username-only
        // authentication (password flag unset while username flag is set)
        // must parse successfully.
        let username = if flags.username {
            Some(ba.read_string()?)
        } else {
            None
        };
        let password = if flags.password {
            let len = ba.read_u16()? as usize;
            Some(ba.read_bytes(len)?.to_vec())
        } else {
            None
        };

        Ok(Self {
            flags,
            keep_alive,
            client_id,
            will_topic,
            will_payload,
            username,
            password,
        })
    }

    /// # Errors
    /// Returns [`EncodeError::TooLong`] if the encoded remaining length would
    /// exceed the varint limit.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        write_string(&mut body, PROTOCOL_NAME);
        body.push(PROTOCOL_LEVEL_V311);
        body.push(self.flags.encode());
        body.write_u16::<BigEndian>(self.keep_alive).expect("vec write");
        write_string(&mut body, &self.client_id);
        if let Some(ref topic) = self.will_topic {
            write_string(&mut body, topic);
            body.write_u16::<BigEndian>(self.will_payload.len() as u16).expect("vec write");
            body.extend_from_slice(&self.will_payload);
        }
        if let Some(ref username) = self.username {
            write_string(&mut body, username);
        }
        if let Some(ref password) = self.password {
            body.write_u16::<BigEndian>(password.len() as u16).expect("vec write");
            body.extend_from_slice(password);
        }

        buf.push(0x10);
        encode_var_int(body.len(), buf)?;
        buf.extend_from_slice(&body);
        Ok(buf.len())
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u16::<BigEndian>(s.len() as u16).expect("vec write");
    buf.extend_from_slice(s.as_bytes());
}
