//! In-memory session store (non-persistent).

use super::{default_variables, History, SessionStore, UserData};
use crate::error::{Error, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct StoredUser {
    variables: HashMap<String, String>,
    last_match: String,
    /// Oldest first.
    history: Vec<(String, String)>,
}

impl StoredUser {
    fn new() -> Self {
        Self {
            variables: default_variables(),
            ..Default::default()
        }
    }

    fn snapshot(&self) -> UserData {
        UserData {
            variables: self.variables.clone(),
            last_match: self.last_match.clone(),
            history: History::from_recent(self.history.iter().rev().cloned()),
        }
    }
}

/// Session store that forgets everything on restart.
pub struct InMemorySessionStore {
    // Insertion order is kept alongside the map so `usernames` is stable.
    users: Mutex<(Vec<String>, HashMap<String, StoredUser>)>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new((Vec::new(), HashMap::new())),
        }
    }

    fn with_user<T>(&self, username: &str, f: impl FnOnce(&mut StoredUser) -> T) -> T {
        let mut guard = self.users.blocking_lock();
        let (order, users) = &mut *guard;
        let user = users.entry(username.to_string()).or_insert_with(|| {
            order.push(username.to_string());
            StoredUser::new()
        });
        f(user)
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemorySessionStore {
    fn is_persistent(&self) -> bool {
        false
    }

    fn init(&self, username: &str) -> Result<UserData> {
        Ok(self.with_user(username, |user| user.snapshot()))
    }

    fn set_variables(&self, username: &str, vars: &HashMap<String, String>) -> Result<()> {
        self.with_user(username, |user| {
            for (key, value) in vars {
                user.variables.insert(key.clone(), value.clone());
            }
        });
        Ok(())
    }

    fn get_variable(&self, username: &str, key: &str) -> Result<String> {
        let guard = self.users.blocking_lock();
        guard
            .1
            .get(username)
            .and_then(|user| user.variables.get(key).cloned())
            .ok_or_else(|| Error::NotFound(format!("variable {} for {}", key, username)))
    }

    fn set_last_match(&self, username: &str, trigger: &str) -> Result<()> {
        self.with_user(username, |user| user.last_match = trigger.to_string());
        Ok(())
    }

    fn get_last_match(&self, username: &str) -> Result<String> {
        let guard = self.users.blocking_lock();
        guard
            .1
            .get(username)
            .map(|user| user.last_match.clone())
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))
    }

    fn append_history(&self, username: &str, input: &str, reply: &str) -> Result<()> {
        self.with_user(username, |user| {
            user.history.push((input.to_string(), reply.to_string()))
        });
        Ok(())
    }

    fn get_history(&self, username: &str) -> Result<History> {
        let guard = self.users.blocking_lock();
        Ok(guard
            .1
            .get(username)
            .map(|user| user.snapshot().history)
            .unwrap_or_default())
    }

    fn get_snapshot(&self, username: &str) -> Result<UserData> {
        let guard = self.users.blocking_lock();
        guard
            .1
            .get(username)
            .map(StoredUser::snapshot)
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))
    }

    fn usernames(&self) -> Result<Vec<String>> {
        Ok(self.users.blocking_lock().0.clone())
    }

    fn clear(&self, username: &str) -> Result<()> {
        let mut guard = self.users.blocking_lock();
        let (order, users) = &mut *guard;
        users.remove(username);
        order.retain(|name| name != username);
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let mut guard = self.users.blocking_lock();
        guard.0.clear();
        guard.1.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::UNDEFINED;

    #[test]
    fn test_init_does_not_reset_existing_user() {
        let store = InMemorySessionStore::new();
        store.init("alice").unwrap();
        store
            .set_variables("alice", &HashMap::from([("name".to_string(), "Alice".to_string())]))
            .unwrap();
        let data = store.init("alice").unwrap();
        assert_eq!(data.variables.get("name").map(String::as_str), Some("Alice"));
        assert_eq!(store.usernames().unwrap().len(), 1);
    }

    #[test]
    fn test_history_most_recent_first() {
        let store = InMemorySessionStore::new();
        store.append_history("bob", "one", "1").unwrap();
        store.append_history("bob", "two", "2").unwrap();
        let history = store.get_history("bob").unwrap();
        assert_eq!(history.input[0], "two");
        assert_eq!(history.input[1], "one");
        assert_eq!(history.input[2], UNDEFINED);
    }

    #[test]
    fn test_clear_forgets_user() {
        let store = InMemorySessionStore::new();
        store.init("carol").unwrap();
        store.clear("carol").unwrap();
        assert_eq!(
            store.get_snapshot("carol").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(store.usernames().unwrap().is_empty());
    }
}
