// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection session state machine: the CONNECT-gated packet dispatch,
//! the QoS 1/2 acknowledgement handshakes, subscribe/unsubscribe, and the
//! will message.

use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use codec::{
    ConnectPacket, PacketType, PingResponsePacket, PublishAckPacket, PublishCompletePacket,
    PublishPacket, PublishReceivedPacket, PublishReleasePacket, QoS, SubscribeAck,
    SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket, UnsubscribePacket,
};

use crate::error::{Error, ErrorKind};
use crate::ledger::MessageLedger;
use crate::message::{Message, MessageState};
use crate::mid::MidAllocator;
use crate::topic_index::TopicIndex;

/// Everything the core needs from a connection: enqueue bytes, or close it.
/// Calls may arrive from any thread — fan-out from one connection's read
/// loop invokes [`Session::publish`] on a subscriber session that lives on a
/// different connection entirely.
pub trait Transport: Send + Sync {
    fn send(&self, bytes: Vec<u8>);
    fn close(&self);
}

pub type TransportHandle = Arc<dyn Transport>;

/// What the CONNECT gate hands to a new or recovered [`Session`].
pub struct SessionInit {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub keep_alive: u16,
    pub clean_session: bool,
    pub will: Option<Message>,
}

impl SessionInit {
    #[must_use]
    pub fn from_connect(packet: &ConnectPacket) -> Self {
        let will = packet.will_topic.as_ref().map(|topic| Message {
            retain: packet.flags.will_retain,
            ..Message::new(topic.clone(), packet.flags.will_qos, packet.will_payload.clone())
        });
        Self {
            client_id: packet.client_id.clone(),
            username: packet.username.clone(),
            password: packet.password.clone(),
            keep_alive: packet.keep_alive,
            clean_session: packet.flags.clean_session,
            will,
        }
    }
}

pub struct Session {
    client_id: String,
    #[allow(dead_code)]
    username: Option<String>,
    #[allow(dead_code)]
    password: Option<Vec<u8>>,
    keep_alive: AtomicU16,
    clean_session: bool,
    will: Mutex<Option<Message>>,
    transport: Mutex<Option<TransportHandle>>,
    topics: Mutex<Vec<String>>,
    outbound: MessageLedger,
    inbound: MessageLedger,
    mid_alloc: MidAllocator,
    last_seen: AtomicU64,
    topic_index: Arc<TopicIndex>,

    #[cfg(test)]
    test_outbox: Mutex<Vec<PublishPacket>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("clean_session", &self.clean_session)
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(init: SessionInit, topic_index: Arc<TopicIndex>) -> Arc<Self> {
        Arc::new(Self {
            client_id: init.client_id,
            username: init.username,
            password: init.password,
            keep_alive: AtomicU16::new(init.keep_alive),
            clean_session: init.clean_session,
            will: Mutex::new(init.will),
            transport: Mutex::new(None),
            topics: Mutex::new(Vec::new()),
            outbound: MessageLedger::new(),
            inbound: MessageLedger::new(),
            mid_alloc: MidAllocator::new(),
            last_seen: AtomicU64::new(now()),
            topic_index,
            #[cfg(test)]
            test_outbox: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    #[must_use]
    pub fn keep_alive(&self) -> u16 {
        self.keep_alive.load(Ordering::Relaxed)
    }

    /// Snapshot of the session's currently-subscribed filters. The acceptor
    /// uses this to unsubscribe everything on teardown.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }

    #[must_use]
    pub fn topic_index(&self) -> &Arc<TopicIndex> {
        &self.topic_index
    }

    /// Re-arm a recovered (parked) session with the keep-alive and will
    /// carried by the CONNECT that revived it; a reconnect may renegotiate
    /// both.
    pub fn rebind(&self, keep_alive: u16, will: Option<Message>) {
        self.keep_alive.store(keep_alive, Ordering::Relaxed);
        *self.will.lock().unwrap() = will;
    }

    /// Unsubscribe every filter this session currently tracks. Called on
    /// teardown of a clean session; a non-clean session is parked with its
    /// subscriptions intact instead.
    pub fn unsubscribe_all(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut topics = self.topics.lock().unwrap();
        for topic in topics.drain(..) {
            self.topic_index.unsubscribe(&topic, &weak);
        }
    }

    /// `true` once more than 1.5x the negotiated keep-alive has elapsed
    /// since the last inbound packet. A keep-alive of `0` disables the
    /// watchdog entirely, per the CONNECT semantics.
    #[must_use]
    pub fn is_stale(&self, now: u64) -> bool {
        let keep_alive = u64::from(self.keep_alive());
        if keep_alive == 0 {
            return false;
        }
        let grace = keep_alive + keep_alive / 2;
        now.saturating_sub(self.last_seen()) > grace
    }

    /// Install (or clear) the transport handle. `None` marks the session as
    /// parked/offline; outbound QoS>0 messages keep accumulating in the
    /// ledger but QoS 0 publishes are dropped.
    pub fn set_transport(&self, transport: Option<TransportHandle>) {
        *self.transport.lock().unwrap() = transport;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.lock().unwrap().is_some()
    }

    /// Removes and returns the will message, if any. A graceful DISCONNECT
    /// clears it directly; whatever remains at teardown time is what the
    /// acceptor publishes.
    pub fn take_will(&self) -> Option<Message> {
        self.will.lock().unwrap().take()
    }

    #[must_use]
    pub fn last_seen(&self) -> u64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.last_seen.store(now(), Ordering::Relaxed);
    }

    fn send_bytes(&self, bytes: Vec<u8>) {
        if let Some(t) = self.transport.lock().unwrap().as_ref() {
            t.send(bytes);
        }
    }

    /// Dispatch one fully-framed inbound packet.
    ///
    /// Returns `Ok(true)` to keep reading, `Ok(false)` to stop reading after
    /// a graceful DISCONNECT, and `Err` on any condition that must
    /// force-close the connection.
    pub fn dispatch(self: &Arc<Self>, packet_type: PacketType, flags: u8, body: &[u8]) -> Result<bool, Error> {
        self.touch();
        match packet_type {
            PacketType::PingRequest => {
                let mut buf = Vec::new();
                PingResponsePacket.encode(&mut buf);
                self.send_bytes(buf);
                Ok(true)
            }
            PacketType::PingResponse => Ok(true),
            PacketType::Publish => self.handle_publish(flags, body),
            PacketType::PublishAck => {
                let ack = PublishAckPacket::decode(body)?;
                self.outbound.remove(ack.packet_id);
                Ok(true)
            }
            PacketType::PublishReceived => {
                let ack = PublishReceivedPacket::decode(body)?;
                self.outbound
                    .update(ack.packet_id, |m| m.state = MessageState::WaitForPubComp);
                let mut buf = Vec::new();
                PublishReleasePacket::new(ack.packet_id).encode(&mut buf);
                self.send_bytes(buf);
                Ok(true)
            }
            PacketType::PublishRelease => self.handle_publish_release(flags, body),
            PacketType::PublishComplete => {
                let ack = PublishCompletePacket::decode(body)?;
                self.outbound.remove(ack.packet_id);
                Ok(true)
            }
            PacketType::Subscribe => self.handle_subscribe(body),
            PacketType::Unsubscribe => self.handle_unsubscribe(body),
            PacketType::Disconnect => {
                if body.is_empty() {
                    self.take_will();
                    Ok(false)
                } else {
                    Err(Error::new(ErrorKind::ProtocolError, "DISCONNECT with non-empty body"))
                }
            }
            PacketType::Connect | PacketType::ConnectAck | PacketType::SubscribeAck | PacketType::UnsubscribeAck => {
                Err(Error::new(
                    ErrorKind::ProtocolError,
                    "unexpected packet type on established session",
                ))
            }
        }
    }

    fn handle_publish(self: &Arc<Self>, flags: u8, body: &[u8]) -> Result<bool, Error> {
        let packet = PublishPacket::decode(flags, body)?;

        if packet.payload.is_empty() && packet.retain {
            // A retained frame with an empty payload clears the slot and is
            // never routed to subscribers.
            self.topic_index.delete_retained(&packet.topic);
            if let Some(packet_id) = packet.packet_id {
                self.ack_incoming_publish(packet.qos, packet_id);
            }
            return Ok(true);
        }

        let mut msg = Message {
            retain: packet.retain,
            dup: packet.dup,
            ..Message::new(packet.topic.clone(), packet.qos, packet.payload.clone())
        };

        match packet.qos {
            QoS::AtMostOnce => {
                self.topic_index.publish(msg);
            }
            QoS::AtLeastOnce => {
                let client_mid = packet.packet_id.ok_or_else(missing_packet_id)?;
                msg.packet_id = client_mid;
                self.ack_incoming_publish(QoS::AtLeastOnce, client_mid);
                self.topic_index.publish(msg);
            }
            QoS::ExactlyOnce => {
                let client_mid = packet.packet_id.ok_or_else(missing_packet_id)?;
                if !self.inbound.contains(client_mid) {
                    // A duplicate PUBLISH for an mid already parked keeps
                    // the first-stored message; only the PUBREC is resent.
                    msg.packet_id = client_mid;
                    msg.state = MessageState::WaitForPubRel;
                    self.inbound.insert(client_mid, msg);
                }
                self.ack_incoming_publish(QoS::ExactlyOnce, client_mid);
            }
        }
        Ok(true)
    }

    fn ack_incoming_publish(&self, qos: QoS, packet_id: u16) {
        let mut buf = Vec::new();
        match qos {
            QoS::AtMostOnce => return,
            QoS::AtLeastOnce => {
                PublishAckPacket::new(packet_id).encode(&mut buf);
            }
            QoS::ExactlyOnce => {
                PublishReceivedPacket::new(packet_id).encode(&mut buf);
            }
        }
        self.send_bytes(buf);
    }

    fn handle_publish_release(self: &Arc<Self>, flags: u8, body: &[u8]) -> Result<bool, Error> {
        let release = PublishReleasePacket::decode(flags, body)?;
        if let Some(msg) = self.inbound.take(release.packet_id) {
            self.topic_index.publish(msg);
        }
        let mut buf = Vec::new();
        PublishCompletePacket::new(release.packet_id).encode(&mut buf);
        self.send_bytes(buf);
        Ok(true)
    }

    fn handle_subscribe(self: &Arc<Self>, body: &[u8]) -> Result<bool, Error> {
        let packet = SubscribePacket::decode(body)?;
        let mut acks = Vec::with_capacity(packet.topics.len());
        {
            let mut topics = self.topics.lock().unwrap();
            for topic in &packet.topics {
                self.topic_index.subscribe(&topic.topic, self);
                if !topics.contains(&topic.topic) {
                    topics.push(topic.topic.clone());
                }
                acks.push(SubscribeAck::Success(topic.qos));
            }
        }
        let ack_packet = SubscribeAckPacket {
            packet_id: packet.packet_id,
            acks,
        };
        let mut buf = Vec::new();
        ack_packet.encode(&mut buf)?;
        self.send_bytes(buf);
        Ok(true)
    }

    fn handle_unsubscribe(self: &Arc<Self>, body: &[u8]) -> Result<bool, Error> {
        let packet = UnsubscribePacket::decode(body)?;
        let weak = Arc::downgrade(self);
        {
            let mut topics = self.topics.lock().unwrap();
            for topic in &packet.topics {
                self.topic_index.unsubscribe(topic, &weak);
                topics.retain(|t| t != topic);
            }
        }
        let mut buf = Vec::new();
        UnsubscribeAckPacket::new(packet.packet_id).encode(&mut buf);
        self.send_bytes(buf);
        Ok(true)
    }

    fn is_mid_in_use(&self, id: u16) -> bool {
        self.outbound.contains(id) || self.inbound.contains(id)
    }

    /// Route an outbound message to the live transport, or park it in the
    /// outbound ledger for a later reconnect flush. Called both from the
    /// topic index fan-out (possibly from another connection's loop) and
    /// locally when a released QoS 2 message is finally delivered.
    pub fn publish(&self, mut msg: Message) {
        msg.state = match msg.qos {
            QoS::AtMostOnce => MessageState::Publish,
            QoS::AtLeastOnce => MessageState::WaitForPubAck,
            QoS::ExactlyOnce => MessageState::WaitForPubRec,
        };

        let transport = self.transport.lock().unwrap().clone();
        match transport {
            Some(t) => {
                if msg.qos != QoS::AtMostOnce {
                    msg.packet_id = self.mid_alloc.allocate(|id| self.is_mid_in_use(id));
                    self.outbound.insert(msg.packet_id, msg.clone());
                }
                self.send_publish(&t, &msg);
            }
            None => {
                if msg.qos == QoS::AtMostOnce {
                    return;
                }
                msg.packet_id = self.mid_alloc.allocate(|id| self.is_mid_in_use(id));
                self.outbound.insert(msg.packet_id, msg);
            }
        }
    }

    fn send_publish(&self, transport: &TransportHandle, msg: &Message) {
        #[cfg(test)]
        self.test_outbox.lock().unwrap().push(msg.to_publish_packet());

        // Fixed header is at most 1 (type/flags) + 4 (remaining-length varint)
        // bytes; `remaining_length` is the cached on-wire size of everything
        // after it, so this sizes the buffer in one shot instead of growing it.
        let mut buf = Vec::with_capacity(5 + msg.remaining_length());
        if let Err(err) = msg.to_publish_packet().encode(&mut buf) {
            log::error!("failed to encode publish for {}: {err:?}", self.client_id);
            return;
        }
        transport.send(buf);
    }

    /// Resend everything still sitting in the outbound ledger. Called once a
    /// parked session is reattached to a live transport.
    pub fn flush_offline(&self) {
        let transport = match self.transport.lock().unwrap().clone() {
            Some(t) => t,
            None => return,
        };
        for (packet_id, msg) in self.outbound.snapshot() {
            if msg.state == MessageState::WaitForPubComp {
                let mut buf = Vec::new();
                PublishReleasePacket::new(packet_id).encode(&mut buf);
                transport.send(buf);
            } else {
                let mut resend = msg.clone();
                resend.dup = true;
                self.send_publish(&transport, &resend);
            }
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn new_for_test(client_id: &str, _offline_store: Arc<crate::offline_store::OfflineStore>) -> Arc<Self> {
        let session = Self::new(
            SessionInit {
                client_id: client_id.to_string(),
                username: None,
                password: None,
                keep_alive: 0,
                clean_session: true,
                will: None,
            },
            Arc::new(TopicIndex::new()),
        );
        session.set_transport(Some(Arc::new(tests_support::RecordingTransport)));
        session
    }

    #[cfg(test)]
    #[must_use]
    pub fn drain_test_outbox(&self) -> Vec<PublishPacket> {
        std::mem::take(&mut self.test_outbox.lock().unwrap())
    }
}

fn missing_packet_id() -> Error {
    Error::new(ErrorKind::ProtocolError, "qos > 0 publish missing packet id")
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline_store::OfflineStore;
    use codec::fixed_header::parse_frame;

    fn connected_session(client_id: &str) -> Arc<Session> {
        Session::new_for_test(client_id, Arc::new(OfflineStore::new()))
    }

    fn frame(bytes: &[u8]) -> (PacketType, u8, Vec<u8>) {
        let f = parse_frame(bytes).unwrap().unwrap();
        (f.packet_type, f.flags, f.body.to_vec())
    }

    #[test]
    fn qos1_publish_then_puback_empties_outbound_ledger() {
        let session = connected_session("c1");
        let msg = Message::new("t", QoS::AtLeastOnce, b"p".to_vec());
        session.publish(msg);
        assert_eq!(session.outbound.len(), 1);

        let mid = session.outbound.snapshot().keys().copied().next().unwrap();
        let mut buf = Vec::new();
        PublishAckPacket::new(mid).encode(&mut buf);
        let (pt, flags, body) = frame(&buf);
        session.dispatch(pt, flags, &body).unwrap();
        assert!(session.outbound.is_empty());
    }

    #[test]
    fn qos2_handshake_clears_both_ledgers() {
        let session = connected_session("c1");
        let publish = PublishPacket {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: false,
            topic: "t".to_string(),
            packet_id: Some(17),
            payload: b"p".to_vec(),
        };
        let mut bytes = Vec::new();
        publish.encode(&mut bytes).unwrap();
        let (pt, flags, body) = frame(&bytes);
        session.dispatch(pt, flags, &body).unwrap();
        assert!(session.inbound.contains(17));

        let mut buf = Vec::new();
        PublishReleasePacket::new(17).encode(&mut buf);
        let (pt, flags, body) = frame(&buf);
        session.dispatch(pt, flags, &body).unwrap();
        assert!(!session.inbound.contains(17));
    }

    #[test]
    fn duplicate_qos2_publish_keeps_original_message() {
        let session = connected_session("c1");
        let first = PublishPacket {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: false,
            topic: "t".to_string(),
            packet_id: Some(5),
            payload: b"first".to_vec(),
        };
        let dup = PublishPacket {
            dup: true,
            payload: b"second".to_vec(),
            ..first.clone()
        };
        for p in [&first, &dup] {
            let mut bytes = Vec::new();
            p.encode(&mut bytes).unwrap();
            let (pt, flags, body) = frame(&bytes);
            session.dispatch(pt, flags, &body).unwrap();
        }
        let stored = session.inbound.get(5).unwrap();
        assert_eq!(stored.payload, b"first");
    }

    #[test]
    fn disconnect_with_body_force_closes() {
        let session = connected_session("c1");
        let result = session.dispatch(PacketType::Disconnect, 0, &[1, 2, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn disconnect_clears_will() {
        let session = Session::new(
            SessionInit {
                client_id: "c1".to_string(),
                username: None,
                password: None,
                keep_alive: 0,
                clean_session: true,
                will: Some(Message::new("bye", QoS::AtMostOnce, b"b".to_vec())),
            },
            Arc::new(TopicIndex::new()),
        );
        let ok = session.dispatch(PacketType::Disconnect, 0, &[]).unwrap();
        assert!(!ok);
        assert!(session.take_will().is_none());
    }

    #[test]
    fn is_stale_respects_keep_alive_zero() {
        let session = connected_session("c1");
        session.rebind(0, None);
        assert!(!session.is_stale(u64::MAX));
    }

    #[test]
    fn is_stale_after_grace_period() {
        let session = connected_session("c1");
        session.rebind(10, None);
        session.last_seen.store(0, Ordering::Relaxed);
        assert!(!session.is_stale(15));
        assert!(session.is_stale(16));
    }

    #[test]
    fn rebind_replaces_keep_alive_and_will() {
        let session = connected_session("c1");
        session.rebind(42, Some(Message::new("bye", QoS::AtMostOnce, b"b".to_vec())));
        assert_eq!(session.keep_alive(), 42);
        assert_eq!(session.take_will().unwrap().topic, "bye");
    }

    #[test]
    fn unsubscribe_all_clears_tracked_topics() {
        let index = Arc::new(TopicIndex::new());
        let session = Session::new(
            SessionInit {
                client_id: "c1".to_string(),
                username: None,
                password: None,
                keep_alive: 0,
                clean_session: false,
                will: None,
            },
            Arc::clone(&index),
        );
        session.topics.lock().unwrap().push("a/b".to_string());
        index.subscribe("a/b", &session);
        session.unsubscribe_all();
        assert!(session.topics().is_empty());
    }
}
