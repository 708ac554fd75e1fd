//! Keyed, cancellable timers owned by a single component.
//!
//! Every debounce window, chunk pause, retry backoff and confirmation timeout
//! in the pipeline is an entry here. Arming a key that is already armed
//! replaces its deadline, so a superseded debounce never fires. Dropping or
//! clearing the set cancels everything it holds.

use std::collections::HashMap;
use std::future::{pending, poll_fn};
use std::hash::Hash;
use std::time::Duration;

use tokio_util::time::delay_queue::{self, DelayQueue};

/// A set of named deadlines backed by [`DelayQueue`].
#[derive(Debug)]
pub struct Timers<K> {
    queue: DelayQueue<K>,
    keys: HashMap<K, delay_queue::Key>,
}

impl<K> Timers<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    /// Arm `key` to fire after `after`, replacing any pending deadline for it.
    pub fn arm(&mut self, key: K, after: Duration) {
        match self.keys.get(&key) {
            Some(slot) => self.queue.reset(slot, after),
            None => {
                let slot = self.queue.insert(key.clone(), after);
                self.keys.insert(key, slot);
            }
        }
    }

    /// Cancel `key`. Returns whether it was armed.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.keys.remove(key) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.keys.contains_key(key)
    }

    /// Cancel every armed timer.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Wait for the next deadline and return its key.
    ///
    /// Never resolves while nothing is armed, which makes it safe to use as a
    /// `tokio::select!` branch. Cancel-safe: a key is only removed when it is
    /// returned.
    pub async fn expired(&mut self) -> K {
        loop {
            if self.keys.is_empty() {
                pending::<()>().await;
            }
            if let Some(entry) = poll_fn(|cx| self.queue.poll_expired(cx)).await {
                let key = entry.into_inner();
                self.keys.remove(&key);
                return key;
            }
            self.keys.clear();
        }
    }
}

impl<K> Default for Timers<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
