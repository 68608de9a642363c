// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Shared topic index: exact-topic and wildcard-pattern subscriber tables
//! plus the retained-message store.
//!
//! Each table lives behind `Mutex<Arc<HashMap<..>>>`. `Arc::make_mut` gives a
//! copy-on-write discipline for free: if a reader is mid-iteration over a
//! cloned `Arc` when a writer takes the lock, the writer transparently
//! clones the map before mutating it, so the reader's snapshot is untouched.
//! Readers only ever hold the mutex long enough to clone the `Arc` (a
//! refcount bump), then iterate lock-free.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use codec::topic::{is_wildcard, matches};

use crate::message::Message;
use crate::session::Session;

#[derive(Clone, Default)]
struct ExactEntry {
    subscribers: Vec<Weak<Session>>,
    retained: Option<Message>,
}

type ExactMap = HashMap<String, ExactEntry>;
type WildcardMap = HashMap<String, Vec<Weak<Session>>>;

#[derive(Default)]
pub struct TopicIndex {
    exact: Mutex<Arc<ExactMap>>,
    wildcard: Mutex<Arc<WildcardMap>>,
}

impl TopicIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` under `filter`. Delivers any retained message(s)
    /// that immediately match the new subscription.
    pub fn subscribe(&self, filter: &str, session: &Arc<Session>) {
        let weak = Arc::downgrade(session);
        if is_wildcard(filter) {
            {
                let mut guard = self.wildcard.lock().unwrap();
                Arc::make_mut(&mut guard)
                    .entry(filter.to_string())
                    .or_default()
                    .push(weak);
            }
            let exact_snapshot = self.exact.lock().unwrap().clone();
            for (topic, entry) in exact_snapshot.iter() {
                if let Some(retained) = &entry.retained {
                    if matches(filter, topic) {
                        session.publish(retained.clone());
                    }
                }
            }
        } else {
            let retained = {
                let mut guard = self.exact.lock().unwrap();
                let map = Arc::make_mut(&mut guard);
                let entry = map.entry(filter.to_string()).or_default();
                entry.subscribers.push(weak);
                entry.retained.clone()
            };
            if let Some(retained) = retained {
                session.publish(retained);
            }
        }
    }

    /// Remove the first weak-ref pointing at `session` under `filter`.
    /// Opportunistically prunes any other expired entries found along the
    /// way. Erases the map entry entirely when it holds neither subscribers
    /// nor (for concrete topics) a retained message.
    pub fn unsubscribe(&self, filter: &str, session: &Weak<Session>) {
        if is_wildcard(filter) {
            let mut guard = self.wildcard.lock().unwrap();
            let map = Arc::make_mut(&mut guard);
            if let Some(subs) = map.get_mut(filter) {
                remove_one_and_prune(subs, session);
                if subs.is_empty() {
                    map.remove(filter);
                }
            }
        } else {
            let mut guard = self.exact.lock().unwrap();
            let map = Arc::make_mut(&mut guard);
            let mut drop_entry = false;
            if let Some(entry) = map.get_mut(filter) {
                remove_one_and_prune(&mut entry.subscribers, session);
                drop_entry = entry.subscribers.is_empty() && entry.retained.is_none();
            }
            if drop_entry {
                map.remove(filter);
            }
        }
    }

    /// Fan a published message out to every matching subscriber. A publish
    /// with `retain` set and a non-empty payload also replaces the topic's
    /// retained slot; a retained frame with an empty payload clears the slot
    /// instead and is never fanned out — callers handle that case themselves
    /// via [`Self::delete_retained`] before calling this.
    pub fn publish(&self, msg: Message) {
        if msg.retain && !msg.payload.is_empty() {
            self.add_retained(msg.clone());
        }

        let exact_snapshot = self.exact.lock().unwrap().clone();
        let wildcard_snapshot = self.wildcard.lock().unwrap().clone();

        let mut targets: Vec<Weak<Session>> = Vec::new();
        if let Some(entry) = exact_snapshot.get(&msg.topic) {
            targets.extend(entry.subscribers.iter().cloned());
        }
        for (filter, subs) in wildcard_snapshot.iter() {
            if matches(filter, &msg.topic) {
                targets.extend(subs.iter().cloned());
            }
        }

        for weak in targets {
            if let Some(session) = weak.upgrade() {
                session.publish(msg.clone());
            }
        }
    }

    pub fn add_retained(&self, msg: Message) {
        let mut guard = self.exact.lock().unwrap();
        let map = Arc::make_mut(&mut guard);
        map.entry(msg.topic.clone()).or_default().retained = Some(msg);
    }

    pub fn delete_retained(&self, topic: &str) {
        let mut guard = self.exact.lock().unwrap();
        let map = Arc::make_mut(&mut guard);
        let mut drop_entry = false;
        if let Some(entry) = map.get_mut(topic) {
            entry.retained = None;
            drop_entry = entry.subscribers.is_empty();
        }
        if drop_entry {
            map.remove(topic);
        }
    }

    #[cfg(test)]
    fn retained(&self, topic: &str) -> Option<Message> {
        self.exact
            .lock()
            .unwrap()
            .get(topic)
            .and_then(|e| e.retained.clone())
    }
}

/// Removes the first live weak-ref matching `target`, while dropping any
/// already-expired entries encountered along the way.
fn remove_one_and_prune(subs: &mut Vec<Weak<Session>>, target: &Weak<Session>) {
    let mut removed = false;
    subs.retain(|w| {
        if !removed && w.ptr_eq(target) {
            removed = true;
            return false;
        }
        w.upgrade().is_some()
    });
}
