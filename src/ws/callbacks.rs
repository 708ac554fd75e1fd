//! Bounded registry of inbound message callbacks.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::Kind;

/// A callback invoked for every validated inbound message.
pub type MessageCallback = Arc<dyn Fn(&Kind) + Send + Sync>;

/// Handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Callbacks in registration order, capped at `capacity`.
///
/// Registering past the cap evicts the oldest callback. Ids are never
/// reused, so registration order is id order.
pub struct CallbackRegistry {
    capacity: usize,
    next_id: u64,
    callbacks: BTreeMap<CallbackId, MessageCallback>,
}

impl CallbackRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_id: 0,
            callbacks: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, callback: MessageCallback) -> CallbackId {
        while self.callbacks.len() >= self.capacity {
            if let Some((evicted, _)) = self.callbacks.pop_first() {
                tracing::warn!(
                    "Callback limit ({}) reached, dropping oldest callback {}",
                    self.capacity,
                    evicted.0
                );
            }
        }
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks.insert(id, callback);
        id
    }

    /// Unregister a callback. Returns whether it was registered.
    pub fn remove(&mut self, id: CallbackId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub fn contains(&self, id: CallbackId) -> bool {
        self.callbacks.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Clone the current callbacks so they can run without holding a lock.
    pub fn snapshot(&self) -> Vec<(CallbackId, MessageCallback)> {
        self.callbacks
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("capacity", &self.capacity)
            .field("len", &self.callbacks.len())
            .finish()
    }
}

/// Run every callback on `msg` in order. A panicking callback is logged and
/// the rest still run.
pub fn deliver(callbacks: &[(CallbackId, MessageCallback)], msg: &Kind) {
    for (id, callback) in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(msg))).is_err() {
            tracing::error!("Message callback {} panicked on '{}'", id.0, msg.name());
        }
    }
}
