//! Bounded queue of messages nobody could answer.
//!
//! Unmatched turns land here for an operator to teach a reply. Resolving an
//! entry learns the rule and removes the entry; the caller is handed the
//! message back so it can deliver the reply.

use crate::error::{Error, Result};
use crate::orchestrator::Bot;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::Mutex;

pub const DEFAULT_REVIEW_CAPACITY: usize = 100;

/// An unanswered message awaiting review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author: String,
    pub content: String,
    pub received_at: DateTime<Utc>,
}

pub struct ReviewQueue {
    capacity: usize,
    entries: Mutex<VecDeque<PendingMessage>>,
}

impl ReviewQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a message, evicting the oldest entry when full.
    pub fn push(&self, message: PendingMessage) {
        let mut entries = self.entries.blocking_lock();
        while entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                tracing::debug!(id = %evicted.id, "Review queue full, dropped oldest entry");
            }
        }
        entries.push_back(message);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.blocking_lock().iter().any(|m| m.id == id)
    }

    /// Remove the entry with `id`, if queued.
    pub fn remove(&self, id: &str) -> Option<PendingMessage> {
        let mut entries = self.entries.blocking_lock();
        let index = entries.iter().position(|m| m.id == id)?;
        entries.remove(index)
    }

    /// Queued messages, newest first.
    pub fn list(&self) -> Vec<PendingMessage> {
        self.entries.blocking_lock().iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.blocking_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Teach `bot` to answer `trigger` with `reply`, then drop entry `id`
    /// and return it.
    ///
    /// An unknown `id` is `NotFound` and nothing is learned. The entry is
    /// kept if learning fails.
    pub fn resolve(&self, bot: &Bot, id: &str, trigger: &str, reply: &str) -> Result<PendingMessage> {
        if !self.contains(id) {
            return Err(Error::NotFound(format!("queued message {}", id)));
        }
        bot.learn_new(trigger, reply)?;
        self.remove(id)
            .ok_or_else(|| Error::NotFound(format!("queued message {}", id)))
    }
}

impl Default for ReviewQueue {
    fn default() -> Self {
        Self::new(DEFAULT_REVIEW_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: &str) -> PendingMessage {
        PendingMessage {
            id: id.to_string(),
            guild_id: "g".to_string(),
            channel_id: "c".to_string(),
            author_id: "u1".to_string(),
            author: "alice".to_string(),
            content: format!("message {}", id),
            received_at: Utc::now(),
        }
    }

    fn ids(queue: &ReviewQueue) -> Vec<String> {
        queue.list().into_iter().map(|m| m.id).collect()
    }

    #[test]
    fn list_is_newest_first() {
        let queue = ReviewQueue::default();
        queue.push(pending("1"));
        queue.push(pending("2"));
        assert_eq!(ids(&queue), ["2", "1"]);
    }

    #[test]
    fn oldest_is_evicted_at_capacity() {
        let queue = ReviewQueue::new(2);
        queue.push(pending("1"));
        queue.push(pending("2"));
        queue.push(pending("3"));
        assert_eq!(ids(&queue), ["3", "2"]);
    }

    #[test]
    fn remove_by_id() {
        let queue = ReviewQueue::default();
        queue.push(pending("1"));
        queue.push(pending("2"));
        assert_eq!(queue.remove("1").map(|m| m.id), Some("1".to_string()));
        assert!(queue.remove("1").is_none());
        assert_eq!(queue.len(), 1);
    }
}
