//! SQLite-backed session store.

use super::{default_variables, History, SessionStore, UserData, HISTORY_SIZE};
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA encoding = "UTF-8";

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE,
    last_match TEXT
);

CREATE TABLE IF NOT EXISTS user_variables (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    key TEXT NOT NULL,
    value TEXT,
    UNIQUE(user_id, key)
);

CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    input TEXT NOT NULL,
    reply TEXT NOT NULL,
    timestamp INTEGER NOT NULL DEFAULT (CAST(strftime('%s', 'now') AS INTEGER))
);

CREATE INDEX IF NOT EXISTS idx_history_user ON history(user_id, timestamp);

CREATE VIEW IF NOT EXISTS v_user_variables AS
SELECT users.username AS username, user_variables.key, user_variables.value
FROM users, user_variables
WHERE users.id = user_variables.user_id;

CREATE VIEW IF NOT EXISTS v_history AS
SELECT users.username AS username, history.input, history.reply, history.timestamp
FROM users, history
WHERE users.id = history.user_id
ORDER BY history.timestamp DESC;
"#;

const UPSERT_VARIABLE: &str = "INSERT INTO user_variables (user_id, key, value)
     VALUES ((SELECT id FROM users WHERE username = ?1), ?2, ?3)
     ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value";

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Open (or create) the session database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::write("open session database"))?;
        tracing::info!("Opened session store at {}", path.display());
        Self::with_connection(conn)
    }

    /// Non-persistent database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::write("open session database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(Error::write("run session schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create the user row and seed default variables if the user is new.
    /// Returns whether the user was created.
    fn create_user_if_missing(tx: &Transaction<'_>, username: &str) -> rusqlite::Result<bool> {
        let created = tx.execute(
            "INSERT OR IGNORE INTO users (username, last_match) VALUES (?1, '')",
            params![username],
        )? == 1;
        if created {
            let mut stmt = tx.prepare(UPSERT_VARIABLE)?;
            for (key, value) in default_variables() {
                stmt.execute(params![username, key, value])?;
            }
        }
        Ok(created)
    }

    fn last_match(conn: &Connection, username: &str) -> Result<Option<String>> {
        conn.query_row(
            "SELECT COALESCE(last_match, '') FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::read("get_last_match"))
    }

    fn history(conn: &Connection, username: &str) -> Result<History> {
        let mut stmt = conn
            .prepare(
                "SELECT input, reply FROM history
                 WHERE user_id = (SELECT id FROM users WHERE username = ?1)
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2",
            )
            .map_err(Error::read("get_history"))?;
        let pairs = stmt
            .query_map(params![username, HISTORY_SIZE as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(Error::read("get_history"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::read("get_history"))?;
        Ok(History::from_recent(pairs))
    }

    fn variables(conn: &Connection, username: &str) -> Result<HashMap<String, String>> {
        let mut stmt = conn
            .prepare("SELECT key, COALESCE(value, '') FROM v_user_variables WHERE username = ?1")
            .map_err(Error::read("get_variables"))?;
        let vars = stmt
            .query_map(params![username], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(Error::read("get_variables"))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(Error::read("get_variables"))?;
        Ok(vars)
    }

    fn snapshot(conn: &Connection, username: &str) -> Result<UserData> {
        let last_match = Self::last_match(conn, username)?
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))?;
        Ok(UserData {
            variables: Self::variables(conn, username)?,
            last_match,
            history: Self::history(conn, username)?,
        })
    }
}

impl SessionStore for SqliteSessionStore {
    fn is_persistent(&self) -> bool {
        true
    }

    fn init(&self, username: &str) -> Result<UserData> {
        let mut conn = self.conn.blocking_lock();
        let tx = conn.transaction().map_err(Error::write("init"))?;
        let created =
            Self::create_user_if_missing(&tx, username).map_err(Error::write("init"))?;
        tx.commit().map_err(Error::write("init"))?;

        if created {
            tracing::debug!(username, "Initialized new session user");
            return Ok(UserData::fresh());
        }
        Self::snapshot(&conn, username)
    }

    fn set_variables(&self, username: &str, vars: &HashMap<String, String>) -> Result<()> {
        let mut conn = self.conn.blocking_lock();
        let tx = conn.transaction().map_err(Error::write("set_variables"))?;
        Self::create_user_if_missing(&tx, username).map_err(Error::write("set_variables"))?;
        {
            let mut stmt = tx
                .prepare(UPSERT_VARIABLE)
                .map_err(Error::write("set_variables"))?;
            for (key, value) in vars {
                stmt.execute(params![username, key, value])
                    .map_err(Error::write("set_variables"))?;
            }
        }
        tx.commit().map_err(Error::write("set_variables"))
    }

    fn get_variable(&self, username: &str, key: &str) -> Result<String> {
        let conn = self.conn.blocking_lock();
        conn.query_row(
            "SELECT COALESCE(value, '') FROM user_variables
             WHERE user_id = (SELECT id FROM users WHERE username = ?1) AND key = ?2",
            params![username, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::read("get_variable"))?
        .ok_or_else(|| Error::NotFound(format!("variable {} for {}", key, username)))
    }

    fn set_last_match(&self, username: &str, trigger: &str) -> Result<()> {
        let mut conn = self.conn.blocking_lock();
        let tx = conn.transaction().map_err(Error::write("set_last_match"))?;
        Self::create_user_if_missing(&tx, username).map_err(Error::write("set_last_match"))?;
        tx.execute(
            "UPDATE users SET last_match = ?1 WHERE username = ?2",
            params![trigger, username],
        )
        .map_err(Error::write("set_last_match"))?;
        tx.commit().map_err(Error::write("set_last_match"))
    }

    fn get_last_match(&self, username: &str) -> Result<String> {
        let conn = self.conn.blocking_lock();
        Self::last_match(&conn, username)?
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))
    }

    fn append_history(&self, username: &str, input: &str, reply: &str) -> Result<()> {
        let mut conn = self.conn.blocking_lock();
        let tx = conn.transaction().map_err(Error::write("append_history"))?;
        Self::create_user_if_missing(&tx, username).map_err(Error::write("append_history"))?;
        tx.execute(
            "INSERT INTO history (user_id, input, reply)
             VALUES ((SELECT id FROM users WHERE username = ?1), ?2, ?3)",
            params![username, input, reply],
        )
        .map_err(Error::write("append_history"))?;
        tx.commit().map_err(Error::write("append_history"))
    }

    fn get_history(&self, username: &str) -> Result<History> {
        let conn = self.conn.blocking_lock();
        Self::history(&conn, username)
    }

    fn get_snapshot(&self, username: &str) -> Result<UserData> {
        let conn = self.conn.blocking_lock();
        Self::snapshot(&conn, username)
    }

    fn usernames(&self) -> Result<Vec<String>> {
        let conn = self.conn.blocking_lock();
        let mut stmt = conn
            .prepare("SELECT username FROM users ORDER BY id")
            .map_err(Error::read("usernames"))?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(Error::read("usernames"))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(Error::read("usernames"))?;
        Ok(names)
    }

    fn clear(&self, username: &str) -> Result<()> {
        let mut conn = self.conn.blocking_lock();
        let tx = conn.transaction().map_err(Error::write("clear"))?;
        tx.execute(
            "DELETE FROM user_variables WHERE user_id = (SELECT id FROM users WHERE username = ?1)",
            params![username],
        )
        .map_err(Error::write("clear"))?;
        tx.execute(
            "DELETE FROM history WHERE user_id = (SELECT id FROM users WHERE username = ?1)",
            params![username],
        )
        .map_err(Error::write("clear"))?;
        tx.execute("DELETE FROM users WHERE username = ?1", params![username])
            .map_err(Error::write("clear"))?;
        tx.commit().map_err(Error::write("clear"))?;
        tracing::info!(username, "Cleared session data");
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn.blocking_lock();
        let tx = conn.transaction().map_err(Error::write("clear_all"))?;
        for table in ["user_variables", "history", "users"] {
            tx.execute(&format!("DELETE FROM {}", table), [])
                .map_err(Error::write("clear_all"))?;
        }
        tx.commit().map_err(Error::write("clear_all"))?;
        tracing::info!("Cleared session data for all users");
        Ok(())
    }
}
