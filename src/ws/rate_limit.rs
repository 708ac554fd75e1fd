//! Sliding-window limiter for outgoing messages.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Allows at most `max_messages` sends in any `window`.
///
/// Rejected sends are not queued; the caller drops them.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_messages: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            sent: VecDeque::with_capacity(max_messages.min(1024)),
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a send at `now` if the window has room. Returns whether it was allowed.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.evict(now);
        if self.sent.len() >= self.max_messages {
            return false;
        }
        self.sent.push_back(now);
        true
    }

    /// Sends still allowed in the window ending at `now`.
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.max_messages.saturating_sub(self.sent.len())
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.sent.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
