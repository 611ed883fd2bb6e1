//! Per-user session storage with pluggable backends.
//!
//! The matching engine reads and writes conversational state exclusively
//! through [`SessionStore`]. Supported backends:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database (`users`, `user_variables`, `history`)

mod memory;
mod sqlite;

pub use memory::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Number of (input, reply) pairs handed to the engine.
pub const HISTORY_SIZE: usize = 10;

/// Placeholder for history slots that hold no data.
pub const UNDEFINED: &str = "undefined";

/// Topic every new user starts in.
pub const DEFAULT_TOPIC: &str = "random";

/// Fixed-length conversation history, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub input: Vec<String>,
    pub reply: Vec<String>,
}

impl History {
    /// A history with every slot set to [`UNDEFINED`].
    pub fn new() -> Self {
        Self {
            input: vec![UNDEFINED.to_string(); HISTORY_SIZE],
            reply: vec![UNDEFINED.to_string(); HISTORY_SIZE],
        }
    }

    /// Build from pairs ordered most recent first. Extra pairs are dropped,
    /// missing ones padded with [`UNDEFINED`].
    pub fn from_recent<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut history = Self::new();
        for (slot, (input, reply)) in pairs.into_iter().take(HISTORY_SIZE).enumerate() {
            history.input[slot] = input.trim().to_string();
            history.reply[slot] = reply.trim().to_string();
        }
        history
    }

    /// Number of slots holding real data.
    pub fn len(&self) -> usize {
        self.input.iter().take_while(|i| i.as_str() != UNDEFINED).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the engine knows about one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub variables: HashMap<String, String>,
    pub last_match: String,
    pub history: History,
}

impl UserData {
    /// State of a user that was just created.
    pub fn fresh() -> Self {
        Self {
            variables: default_variables(),
            last_match: String::new(),
            history: History::new(),
        }
    }
}

/// Variables seeded for every new user.
pub fn default_variables() -> HashMap<String, String> {
    HashMap::from([("topic".to_string(), DEFAULT_TOPIC.to_string())])
}

/// What to do with a frozen snapshot when thawing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThawAction {
    /// Restore the snapshot and delete it.
    Thaw,
    /// Delete the snapshot without restoring.
    Discard,
    /// Restore the snapshot and keep it.
    Keep,
}

/// Storage contract the matching engine drives.
///
/// All methods are synchronous. Implementations serialize their own writes;
/// a failed write surfaces as [`crate::Error::StorageFault`].
pub trait SessionStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Return the user's state, creating the user with default variables
    /// if absent. Never resets an existing user.
    fn init(&self, username: &str) -> Result<UserData>;

    /// Upsert variables in a single transaction, last write wins per key.
    fn set_variables(&self, username: &str, vars: &HashMap<String, String>) -> Result<()>;

    /// Fails with `NotFound` when the variable is absent.
    fn get_variable(&self, username: &str, key: &str) -> Result<String>;

    fn set_last_match(&self, username: &str, trigger: &str) -> Result<()>;

    /// Fails with `NotFound` when the user does not exist.
    fn get_last_match(&self, username: &str) -> Result<String>;

    /// Append one exchange. Trimming to [`HISTORY_SIZE`] happens on read.
    fn append_history(&self, username: &str, input: &str, reply: &str) -> Result<()>;

    fn get_history(&self, username: &str) -> Result<History>;

    /// Aggregate of variables, last match and history. Fails with `NotFound`
    /// when the user does not exist.
    fn get_snapshot(&self, username: &str) -> Result<UserData>;

    /// Known usernames.
    fn usernames(&self) -> Result<Vec<String>>;

    /// Snapshots for every known user.
    fn get_all(&self) -> Result<HashMap<String, UserData>> {
        let mut all = HashMap::new();
        for username in self.usernames()? {
            let data = self.get_snapshot(&username)?;
            all.insert(username, data);
        }
        Ok(all)
    }

    /// Irreversibly delete everything stored for one user.
    fn clear(&self, username: &str) -> Result<()>;

    /// Irreversibly delete everything stored for all users.
    fn clear_all(&self) -> Result<()>;

    /// Snapshot user variables. Not supported by any backend.
    fn freeze(&self, username: &str) -> Result<()> {
        let _ = username;
        Err(crate::Error::Unsupported("freeze"))
    }

    /// Restore from a snapshot. Not supported by any backend.
    fn thaw(&self, username: &str, action: ThawAction) -> Result<()> {
        let _ = (username, action);
        Err(crate::Error::Unsupported("thaw"))
    }
}

/// Session store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStoreType {
    Memory,
    #[default]
    Sqlite,
}

impl SessionStoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Create a session store based on type. `path` is ignored for `Memory`.
pub fn create_session_store(
    store_type: SessionStoreType,
    path: &Path,
) -> Result<Arc<dyn SessionStore>> {
    match store_type {
        SessionStoreType::Memory => Ok(Arc::new(InMemorySessionStore::new())),
        SessionStoreType::Sqlite => Ok(Arc::new(SqliteSessionStore::open(path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_history_padding_goes_last() {
        let history = History::from_recent(vec![
            ("newest".to_string(), "r2".to_string()),
            (" older ".to_string(), "r1 ".to_string()),
        ]);
        assert_eq!(history.input.len(), HISTORY_SIZE);
        assert_eq!(history.reply.len(), HISTORY_SIZE);
        assert_eq!(history.input[0], "newest");
        assert_eq!(history.input[1], "older");
        assert_eq!(history.reply[1], "r1");
        assert!(history.input[2..].iter().all(|i| i == UNDEFINED));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_history_truncates_to_size() {
        let pairs = (0..15).map(|i| (format!("in{}", i), format!("out{}", i)));
        let history = History::from_recent(pairs);
        assert_eq!(history.input.len(), HISTORY_SIZE);
        assert_eq!(history.input[9], "in9");
        assert_eq!(history.len(), HISTORY_SIZE);
    }

    #[test]
    fn test_store_type_parsing() {
        assert_eq!(SessionStoreType::from_str("memory"), SessionStoreType::Memory);
        assert_eq!(SessionStoreType::from_str("SQLITE"), SessionStoreType::Sqlite);
        assert_eq!(SessionStoreType::from_str("bogus"), SessionStoreType::Sqlite);
    }

    #[test]
    fn test_freeze_and_thaw_report_unsupported() {
        let store = InMemorySessionStore::new();
        store.init("alice").unwrap();
        let err = store.freeze("alice").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        for action in [ThawAction::Thaw, ThawAction::Discard, ThawAction::Keep] {
            let err = store.thaw("alice", action).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Unsupported);
        }
    }
}
