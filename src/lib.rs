//! # replybot
//!
//! Conversational bot that answers chat messages with a pattern-matching
//! dialogue engine backed by durable per-user state.
//!
//! ## Architecture
//!
//! ```text
//!   chat platform ──▶ MessageGate ──▶ Bot (global lock)
//!                        │              ├── RecencyBuffer (per user, 30s)
//!                        │              └── MatchingEngine ──▶ SessionStore (SQLite)
//!                        ▼
//!                   ReviewQueue ──▶ Bot::learn_new ──▶ RuleLog (SQLite)
//! ```
//!
//! ## Reply Flow
//! 1. Normalize the message and record it in the sender's recency buffer
//! 2. Ask the engine for a reply
//! 3. On no match, retry with buffered context, newest messages first
//! 4. Still nothing: queue the message for manual review
//!
//! ## Modules
//! - `session`: per-user variables, last match and history
//! - `orchestrator`: reply fallback and rule learning
//! - `engine`: matching engine seam and a minimal script engine
//! - `geo`: cached geocoding for distance replies

pub mod adapter;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod learning;
pub mod normalize;
pub mod orchestrator;
pub mod review;
pub mod session;
pub mod subroutines;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::Bot;
pub use session::{SessionStore, UserData};
