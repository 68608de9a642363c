// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-session message ledger: a mid -> Message map behind a single mutex.
//! Used for both the outbound (awaiting ack from the peer) and inbound
//! (QoS 2, awaiting PUBREL) sides of a session.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::message::Message;

#[derive(Debug, Default)]
pub struct MessageLedger {
    inner: Mutex<HashMap<u16, Message>>,
}

impl MessageLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any existing entry with the same mid.
    pub fn insert(&self, packet_id: u16, msg: Message) {
        self.inner.lock().unwrap().insert(packet_id, msg);
    }

    /// Removes and returns the entry, if present.
    pub fn take(&self, packet_id: u16) -> Option<Message> {
        self.inner.lock().unwrap().remove(&packet_id)
    }

    /// Looks up without removing.
    pub fn get(&self, packet_id: u16) -> Option<Message> {
        self.inner.lock().unwrap().get(&packet_id).cloned()
    }

    /// No-op if `packet_id` is absent.
    pub fn remove(&self, packet_id: u16) {
        self.inner.lock().unwrap().remove(&packet_id);
    }

    /// Replace an existing entry's state/fields in place, if present.
    pub fn update<F: FnOnce(&mut Message)>(&self, packet_id: u16, f: F) {
        if let Some(msg) = self.inner.lock().unwrap().get_mut(&packet_id) {
            f(msg);
        }
    }

    /// A consistent copy of the whole map, safe to iterate without holding
    /// the lock.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<u16, Message> {
        self.inner.lock().unwrap().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.inner.lock().unwrap().contains_key(&packet_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    #[test]
    fn take_is_exactly_once() {
        let ledger = MessageLedger::new();
        ledger.insert(7, Message::new("t", QoS::AtLeastOnce, b"p".to_vec()));
        assert!(ledger.take(7).is_some());
        assert!(ledger.take(7).is_none());
    }

    #[test]
    fn insert_overwrites_same_mid() {
        let ledger = MessageLedger::new();
        ledger.insert(1, Message::new("a", QoS::AtLeastOnce, Vec::new()));
        ledger.insert(1, Message::new("b", QoS::AtLeastOnce, Vec::new()));
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.take(1).unwrap().topic, "b");
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let ledger = MessageLedger::new();
        ledger.remove(42);
        assert!(ledger.is_empty());
    }

    #[test]
    fn snapshot_is_independent_of_later_mutation() {
        let ledger = MessageLedger::new();
        ledger.insert(1, Message::new("a", QoS::AtLeastOnce, Vec::new()));
        let snap = ledger.snapshot();
        ledger.insert(2, Message::new("b", QoS::AtLeastOnce, Vec::new()));
        assert_eq!(snap.len(), 1);
        assert_eq!(ledger.len(), 2);
    }
}
