//! Configuration management for replybot.
//!
//! Configuration can be set via environment variables:
//! - `REPLYBOT_DATA_DIR` - Optional. Directory for the SQLite files. Defaults to `.`.
//! - `REPLYBOT_SESSION_STORE` - Optional. `sqlite` (default) or `memory`.
//! - `REPLYBOT_BRAIN_DIR` - Optional. Directory of `*.rive` scripts. Defaults to `brain`.
//! - `MAPBOX_TOKEN` - Optional. Enables distance lookups in replies.
//! - `REPLYBOT_GUILDS` - Optional. Comma-separated guilds to listen to (empty = all).
//! - `REPLYBOT_ADMINS` - Optional. Comma-separated user IDs allowed to `!reload`.
//! - `REPLYBOT_MUTE` - Optional. Compute replies without sending them.
//! - `REPLYBOT_DEBUG` - Optional. Verbose logging.
//! - `REPLYBOT_CONTEXT_WINDOW_SECS` - Optional. Recency window. Defaults to `30`.
//! - `REPLYBOT_MAX_MESSAGE_AGE_SECS` - Optional. Older messages are ignored. Defaults to `300`.
//! - `REPLYBOT_REVIEW_CAPACITY` - Optional. Unanswered messages kept for review. Defaults to `100`.

use crate::session::SessionStoreType;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where `session.db`, `rivescript.db` and `geo.db` live
    pub data_dir: PathBuf,

    pub session_store: SessionStoreType,

    /// Base rule scripts
    pub brain_dir: PathBuf,

    pub mapbox_token: Option<String>,

    /// Guilds to listen to; empty listens everywhere
    pub guilds: Vec<String>,

    pub admins: Vec<String>,

    pub mute: bool,

    pub debug: bool,

    /// Seconds a message stays available as fallback context
    pub context_window_secs: i64,

    /// Messages older than this (seconds) never reach the bot
    pub max_message_age_secs: i64,

    pub review_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("REPLYBOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let session_store = std::env::var("REPLYBOT_SESSION_STORE")
            .map(|s| SessionStoreType::from_str(&s))
            .unwrap_or_default();

        let brain_dir = std::env::var("REPLYBOT_BRAIN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("brain"));

        let mapbox_token = std::env::var("MAPBOX_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        Ok(Self {
            data_dir,
            session_store,
            brain_dir,
            mapbox_token,
            guilds: env_list("REPLYBOT_GUILDS"),
            admins: env_list("REPLYBOT_ADMINS"),
            mute: env_var_bool("REPLYBOT_MUTE", false),
            debug: env_var_bool("REPLYBOT_DEBUG", false),
            context_window_secs: env_parse("REPLYBOT_CONTEXT_WINDOW_SECS", 30)?,
            max_message_age_secs: env_parse("REPLYBOT_MAX_MESSAGE_AGE_SECS", 300)?,
            review_capacity: env_parse("REPLYBOT_REVIEW_CAPACITY", 100)?,
        })
    }

    /// Create a config rooted at `data_dir` with defaults (useful for testing).
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            brain_dir: data_dir.join("brain"),
            data_dir,
            session_store: SessionStoreType::Sqlite,
            mapbox_token: None,
            guilds: Vec::new(),
            admins: Vec::new(),
            mute: false,
            debug: false,
            context_window_secs: 30,
            max_message_age_secs: 300,
            review_capacity: 100,
        }
    }

    pub fn session_db_path(&self) -> PathBuf {
        self.data_dir.join("session.db")
    }

    pub fn rules_db_path(&self) -> PathBuf {
        self.data_dir.join("rivescript.db")
    }

    pub fn geo_db_path(&self) -> PathBuf {
        self.data_dir.join("geo.db")
    }
}

/// Parse an environment variable as a boolean, returning `default` if unset.
///
/// Recognises `1`, `true`, `yes`, `y`, `on` (case-insensitive) as `true`.
pub fn env_var_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| parse_list(&v))
        .unwrap_or_default()
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}
