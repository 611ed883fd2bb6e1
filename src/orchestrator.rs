//! Reply orchestration.
//!
//! [`Bot`] owns the matching engine and the recency buffer behind one global
//! lock. Every `reply` and `learn_new` call, for every user, is serialized on
//! that lock because the engine is not safe for concurrent use.
//!
//! ## Reply flow
//! 1. Collapse whitespace and record the message in the user's buffer
//! 2. Try the message on its own
//! 3. On no match, walk the buffer newest to oldest, prepending each entry
//!    to a growing composite and retrying it. The one-entry composite is the
//!    message itself and is not retried
//! 4. A composite match clears the user's buffer; total failure keeps it

use crate::buffer::{RecencyBuffer, RecentMessage};
use crate::engine::{format_rule, MatchingEngine};
use crate::error::{Error, Result};
use crate::learning::RuleLog;
use crate::normalize::{canonicalize, collapse_whitespace};
use crate::session::{SessionStore, UserData};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Builds a fresh engine with its base rules loaded. Learned rules are
/// streamed on top by the bot.
pub type EngineFactory = Box<dyn Fn() -> Result<Box<dyn MatchingEngine>> + Send + Sync>;

struct BotState {
    engine: Box<dyn MatchingEngine>,
    buffer: RecencyBuffer,
}

pub struct Bot {
    state: Mutex<BotState>,
    store: Arc<dyn SessionStore>,
    rules: RuleLog,
    factory: EngineFactory,
}

impl Bot {
    pub fn new(
        store: Arc<dyn SessionStore>,
        rules: RuleLog,
        factory: EngineFactory,
        window: Duration,
    ) -> Result<Self> {
        let engine = Self::build_engine(&factory, &rules)?;
        Ok(Self {
            state: Mutex::new(BotState {
                engine,
                buffer: RecencyBuffer::new(window),
            }),
            store,
            rules,
            factory,
        })
    }

    fn build_engine(factory: &EngineFactory, rules: &RuleLog) -> Result<Box<dyn MatchingEngine>> {
        let mut engine = factory()?;
        let script = rules.script()?;
        if !script.is_empty() {
            engine.stream(&script)?;
            tracing::info!("Streamed learned rules");
        }
        engine.sort_replies()?;
        Ok(engine)
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Reply to `message` from `username`.
    pub fn reply(&self, username: &str, message: &str) -> Result<String> {
        self.reply_at(username, message, Utc::now())
    }

    /// Reply as if the message arrived at `now`.
    pub fn reply_at(&self, username: &str, message: &str, now: DateTime<Utc>) -> Result<String> {
        let mut guard = self.state.blocking_lock();
        let state = &mut *guard;

        let message = collapse_whitespace(message);
        if message.is_empty() {
            return Err(Error::NoMatch);
        }
        state.buffer.record(username, &message, now);

        match state.engine.reply(username, &message) {
            Ok(reply) => return Ok(reply),
            Err(Error::NoMatch) => {}
            Err(e) => return Err(e),
        }

        let recent = state.buffer.recent(username, now);
        let mut composite = String::new();
        for (attempt, entry) in recent.iter().rev().enumerate() {
            composite = collapse_whitespace(&format!("{} {}", entry.content, composite));
            if attempt == 0 && composite == message {
                continue;
            }
            match state.engine.reply(username, &composite) {
                Ok(reply) => {
                    tracing::info!(
                        username,
                        attempt,
                        composite = %composite,
                        "Matched with buffered context"
                    );
                    state.buffer.clear(username);
                    return Ok(reply);
                }
                Err(Error::NoMatch) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(username, buffered = recent.len(), "No trigger matched");
        Err(Error::NoMatch)
    }

    /// Learn a new rule: persist it and make it live immediately.
    ///
    /// The trigger is canonicalized the way the engine canonicalizes input.
    /// An empty trigger or reply is `Error::Invalid` and touches neither the
    /// log nor the engine. The rule log insert is committed only after the
    /// engine accepted and re-sorted the rule.
    pub fn learn_new(&self, trigger: &str, reply: &str) -> Result<()> {
        let mut guard = self.state.blocking_lock();
        let engine = &mut guard.engine;

        let trigger = canonicalize(trigger, engine.punctuation());
        let reply = collapse_whitespace(reply);
        if trigger.is_empty() || reply.is_empty() {
            return Err(Error::Invalid("trigger and reply must not be empty".to_string()));
        }

        self.rules.record(&trigger, &reply, || {
            engine.stream(&format_rule(&trigger, &reply))?;
            engine.sort_replies()
        })?;
        tracing::info!(trigger = %trigger, "Learned new rule");
        Ok(())
    }

    /// Replace the engine with a freshly built one (base rules + rule log).
    /// The recency buffer is kept.
    ///
    /// The global lock is held while the rule log is read, so a rule learned
    /// concurrently lands either in the log snapshot or in the new engine.
    pub fn reload(&self) -> Result<()> {
        let mut state = self.state.blocking_lock();
        state.engine = Self::build_engine(&self.factory, &self.rules)?;
        tracing::info!("Reloaded matching engine");
        Ok(())
    }

    /// Persisted state for `username`.
    pub fn snapshot(&self, username: &str) -> Result<UserData> {
        self.store.get_snapshot(username)
    }

    /// Buffered messages still inside the window.
    pub fn recent(&self, username: &str) -> Vec<RecentMessage> {
        self.recent_at(username, Utc::now())
    }

    pub fn recent_at(&self, username: &str, now: DateTime<Utc>) -> Vec<RecentMessage> {
        self.state.blocking_lock().buffer.recent(username, now)
    }

    /// Delete everything known about `username`, durable and transient.
    pub fn forget(&self, username: &str) -> Result<()> {
        let mut state = self.state.blocking_lock();
        state.buffer.clear(username);
        self.store.clear(username)
    }
}
