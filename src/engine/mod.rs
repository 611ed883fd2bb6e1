//! Matching engine capability.
//!
//! The orchestrator treats the engine as opaque: give it a username and a
//! normalized utterance, get back a reply or [`crate::Error::NoMatch`]. The
//! engine reads and writes per-user state through a
//! [`crate::session::SessionStore`] it is constructed with.
//!
//! Engines are not safe for concurrent mutation or query-while-mutating, so
//! every method takes `&mut self` and callers hold an exclusive lock.

mod script;

pub use script::ScriptEngine;

use crate::error::Result;
use regex::Regex;
use std::sync::Arc;

/// A function the engine can call from inside a reply.
pub type Subroutine = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

pub trait MatchingEngine: Send {
    /// Match `text` for `username`. Returns `Error::NoMatch` when no trigger
    /// matched.
    fn reply(&mut self, username: &str, text: &str) -> Result<String>;

    /// Parse and add rules from script source. Added rules become eligible
    /// after the next [`MatchingEngine::sort_replies`].
    fn stream(&mut self, code: &str) -> Result<()>;

    /// Rebuild match priority over every loaded rule.
    fn sort_replies(&mut self) -> Result<()>;

    /// Punctuation the engine strips from input before matching.
    fn punctuation(&self) -> &Regex;

    /// Register a subroutine callable from replies.
    fn set_subroutine(&mut self, name: &str, subroutine: Subroutine);
}

/// Render a `(trigger, reply)` pair as a script record.
pub fn format_rule(trigger: &str, reply: &str) -> String {
    format!("+ {}\n- {}\n", trigger, reply)
}
