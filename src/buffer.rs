//! Time-windowed buffer of recent inbound messages, per user.
//!
//! Entries live only in process memory. Expiry is lazy: every access prunes
//! entries older than the window, measured against the caller's clock.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// Default context window.
pub const DEFAULT_WINDOW_SECS: i64 = 30;

/// One buffered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RecencyBuffer {
    window: Duration,
    entries: HashMap<String, VecDeque<RecentMessage>>,
}

impl RecencyBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Append a message for `username` and prune expired entries.
    pub fn record(&mut self, username: &str, content: &str, now: DateTime<Utc>) {
        let queue = self.entries.entry(username.to_string()).or_default();
        queue.push_back(RecentMessage {
            content: content.to_string(),
            timestamp: now,
        });
        Self::prune_queue(queue, self.window, now);
    }

    /// Live entries for `username`, oldest first.
    pub fn recent(&mut self, username: &str, now: DateTime<Utc>) -> Vec<RecentMessage> {
        let window = self.window;
        let Some(queue) = self.entries.get_mut(username) else {
            return Vec::new();
        };
        Self::prune_queue(queue, window, now);
        let live: Vec<RecentMessage> = queue.iter().cloned().collect();
        if queue.is_empty() {
            self.entries.remove(username);
        }
        live
    }

    /// Drop every entry for `username`.
    pub fn clear(&mut self, username: &str) {
        self.entries.remove(username);
    }

    /// Drop everything.
    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    fn prune_queue(queue: &mut VecDeque<RecentMessage>, window: Duration, now: DateTime<Utc>) {
        // Visible only while now - timestamp < window.
        queue.retain(|m| now.signed_duration_since(m.timestamp) < window);
    }
}

impl Default for RecencyBuffer {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_WINDOW_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn contents(messages: &[RecentMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.content.as_str()).collect()
    }

    #[test]
    fn entries_are_kept_in_arrival_order() {
        let mut buffer = RecencyBuffer::default();
        buffer.record("alice", "one", at(0));
        buffer.record("alice", "two", at(1));
        buffer.record("alice", "three", at(2));
        assert_eq!(contents(&buffer.recent("alice", at(3))), ["one", "two", "three"]);
    }

    #[test]
    fn entry_expires_at_exactly_the_window() {
        let mut buffer = RecencyBuffer::default();
        buffer.record("alice", "old", at(0));
        assert_eq!(buffer.recent("alice", at(29)).len(), 1);
        assert!(buffer.recent("alice", at(30)).is_empty());
    }

    #[test]
    fn recording_prunes_stale_entries() {
        let mut buffer = RecencyBuffer::default();
        buffer.record("alice", "old", at(0));
        buffer.record("alice", "new", at(45));
        assert_eq!(contents(&buffer.recent("alice", at(45))), ["new"]);
    }

    #[test]
    fn users_do_not_share_entries() {
        let mut buffer = RecencyBuffer::default();
        buffer.record("alice", "a1", at(0));
        buffer.record("bob", "b1", at(0));
        buffer.clear("alice");
        assert!(buffer.recent("alice", at(1)).is_empty());
        assert_eq!(contents(&buffer.recent("bob", at(1))), ["b1"]);
    }

    #[test]
    fn custom_window_is_respected() {
        let mut buffer = RecencyBuffer::new(Duration::seconds(5));
        buffer.record("alice", "x", at(0));
        assert!(buffer.recent("alice", at(5)).is_empty());
    }
}
