// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Map of client-id -> suspended session for non-clean-session reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::session::Session;

#[derive(Default)]
pub struct OfflineStore {
    inner: Mutex<HashMap<String, Arc<Session>>>,
}

impl OfflineStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on non-clean disconnect; parks the session for later reconnect.
    pub fn push(&self, client_id: String, session: Arc<Session>) {
        self.inner.lock().unwrap().insert(client_id, session);
    }

    /// Called on reconnect; removes and returns the parked session, if any.
    pub fn pop(&self, client_id: &str) -> Option<Arc<Session>> {
        self.inner.lock().unwrap().remove(client_id)
    }
}
