//! Durable log of learned trigger/reply rules.
//!
//! Rules are stored with their trigger already canonical. At startup the whole
//! log is streamed into the engine; at runtime a new rule is committed only
//! once the live engine has accepted it.

use crate::engine::format_rule;
use crate::error::{Error, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS learned (
    trigger TEXT NOT NULL,
    reply TEXT NOT NULL
);
"#;

/// A learned rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnedRule {
    pub trigger: String,
    pub reply: String,
}

pub struct RuleLog {
    conn: Mutex<Connection>,
}

impl RuleLog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(Error::write("open rule log"))?;
        tracing::info!("Opened rule log at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(Error::write("open rule log"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(Error::write("run rule log schema"))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Distinct rules in the order they were first learned.
    pub fn load_all(&self) -> Result<Vec<LearnedRule>> {
        let conn = self.conn.blocking_lock();
        let mut stmt = conn
            .prepare(
                "SELECT trigger, reply FROM learned
                 GROUP BY trigger, reply
                 ORDER BY MIN(rowid)",
            )
            .map_err(Error::read("load learned rules"))?;
        let rules = stmt
            .query_map([], |row| {
                Ok(LearnedRule {
                    trigger: row.get(0)?,
                    reply: row.get(1)?,
                })
            })
            .map_err(Error::read("load learned rules"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Error::read("load learned rules"))?;
        Ok(rules)
    }

    /// Every learned rule rendered as engine script.
    pub fn script(&self) -> Result<String> {
        Ok(self
            .load_all()?
            .iter()
            .map(|rule| format_rule(&rule.trigger, &rule.reply))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Append a rule. `activate` runs inside the write transaction; if it
    /// fails the insert is rolled back and its error returned.
    pub fn record<F>(&self, trigger: &str, reply: &str, activate: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let mut conn = self.conn.blocking_lock();
        let tx = conn.transaction().map_err(Error::write("learn rule"))?;
        tx.execute(
            "INSERT INTO learned (trigger, reply) VALUES (?1, ?2)",
            params![trigger, reply],
        )
        .map_err(Error::write("learn rule"))?;

        if let Err(e) = activate() {
            tracing::warn!(trigger, "Engine rejected learned rule, rolling back: {}", e);
            return Err(e);
        }
        tx.commit().map_err(Error::write("learn rule"))
    }

    /// Number of stored records, duplicates included.
    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.blocking_lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM learned", [], |row| row.get(0))
            .map_err(Error::read("count learned rules"))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
