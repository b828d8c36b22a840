//! Short-lived state for multi-step peer creation.
//!
//! A front end that asks for the name first and the address second keeps the
//! pending name here, keyed by the conversation it came from. Entries expire so
//! an abandoned dialogue never leaks into a later one.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// A creation waiting for its second step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCreate {
    /// Sanitized peer name.
    pub name: String,
    /// Octet chosen so far, if any.
    pub requested_octet: Option<u8>,
    started: Instant,
}

impl PendingCreate {
    /// Time since the session began.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Pending creations keyed by conversation.
#[derive(Debug)]
pub struct SessionStore<K> {
    ttl: Duration,
    sessions: Mutex<HashMap<K, PendingCreate>>,
}

impl<K: Eq + Hash + Clone> SessionStore<K> {
    /// Creates a store whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts (or restarts) a session for `key`.
    pub fn begin(&self, key: K, name: impl Into<String>) {
        let pending = PendingCreate {
            name: name.into(),
            requested_octet: None,
            started: Instant::now(),
        };
        self.sessions.lock().insert(key, pending);
    }

    /// Records the octet for an active session. Returns `false` if none is active.
    pub fn set_octet(&self, key: &K, octet: u8) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(key) {
            Some(pending) if pending.started.elapsed() < self.ttl => {
                pending.requested_octet = Some(octet);
                true
            }
            Some(_) => {
                sessions.remove(key);
                false
            }
            None => false,
        }
    }

    /// Returns the active session for `key`; an expired one is dropped.
    pub fn get(&self, key: &K) -> Option<PendingCreate> {
        let mut sessions = self.sessions.lock();
        let pending = sessions.get(key)?;
        if pending.started.elapsed() >= self.ttl {
            sessions.remove(key);
            return None;
        }
        Some(pending.clone())
    }

    /// Removes and returns the active session for `key`.
    pub fn take(&self, key: &K) -> Option<PendingCreate> {
        let pending = self.sessions.lock().remove(key)?;
        (pending.started.elapsed() < self.ttl).then_some(pending)
    }

    /// Drops every expired session. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, pending| pending.started.elapsed() < self.ttl);
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "expired pending sessions");
        }
        purged
    }

    /// Number of stored sessions, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_then_take() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.begin(42_i64, "alice");
        assert!(store.set_octet(&42, 7));

        let pending = store.take(&42).expect("pending");
        assert_eq!(pending.name, "alice");
        assert_eq!(pending.requested_octet, Some(7));
        assert!(store.take(&42).is_none());
    }

    #[test]
    fn sessions_are_per_conversation() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.begin(1_i64, "alice");
        store.begin(2_i64, "bob");
        assert_eq!(store.get(&1).expect("one").name, "alice");
        assert_eq!(store.get(&2).expect("two").name, "bob");
        assert!(!store.set_octet(&3, 9));
    }

    #[test]
    fn expired_sessions_vanish() {
        let store = SessionStore::new(Duration::ZERO);
        store.begin("chat", "alice");
        assert!(store.get(&"chat").is_none());
        assert!(store.is_empty());

        store.begin("chat", "alice");
        assert!(store.take(&"chat").is_none());

        store.begin("a", "x");
        store.begin("b", "y");
        assert_eq!(store.purge_expired(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn restarting_replaces_name() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.begin(1_u64, "alice");
        store.begin(1_u64, "alicia");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&1).expect("pending").name, "alicia");
    }
}
