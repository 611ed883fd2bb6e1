//! Chat-platform boundary.
//!
//! [`MessageGate`] decides which inbound messages reach the bot and what
//! happens with the result; [`ChatTransport`] is the seam to the platform
//! itself. [`run`] pumps messages from a transport through the gate.
//!
//! Admins drive the review queue from chat: `!queue` lists unanswered
//! messages and `!learn <id> <trigger> => <reply>` teaches a rule and answers
//! the queued message with it.

use crate::error::{Error, Result};
use crate::orchestrator::Bot;
use crate::review::{PendingMessage, ReviewQueue};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use uuid::Uuid;

/// Admin command that rebuilds the engine.
pub const RELOAD_COMMAND: &str = "!reload";

/// Admin command listing messages awaiting review.
pub const QUEUE_COMMAND: &str = "!queue";

/// Admin command teaching a reply for a queued message:
/// `!learn <id> <trigger> => <reply>`.
pub const LEARN_COMMAND: &str = "!learn";

/// A message as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    /// Platform-assigned creation time.
    pub timestamp: DateTime<Utc>,
    /// Set when this is an edit of an earlier message.
    pub edited: bool,
}

/// Why a message never reached the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    UnknownGuild,
    Empty,
    Stale,
}

/// What the gate did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    /// No trigger matched; the message is waiting for review.
    Queued,
    Reloaded,
    /// Messages awaiting review, newest first, for the admin who asked.
    Pending(Vec<PendingMessage>),
    /// A rule was taught for a queued message; `reply` answers `original`.
    Learned {
        reply: String,
        original: InboundMessage,
    },
    Ignored(IgnoreReason),
}

impl From<PendingMessage> for InboundMessage {
    fn from(pending: PendingMessage) -> Self {
        Self {
            id: pending.id,
            guild_id: pending.guild_id,
            channel_id: pending.channel_id,
            author_id: pending.author_id,
            author_name: pending.author,
            content: pending.content,
            timestamp: pending.received_at,
            edited: false,
        }
    }
}

pub struct MessageGate {
    bot: Arc<Bot>,
    review: Arc<ReviewQueue>,
    self_id: String,
    guilds: HashSet<String>,
    admins: HashSet<String>,
    max_age: Duration,
    mute: bool,
}

impl MessageGate {
    pub fn new(bot: Arc<Bot>, review: Arc<ReviewQueue>, self_id: impl Into<String>) -> Self {
        Self {
            bot,
            review,
            self_id: self_id.into(),
            guilds: HashSet::new(),
            admins: HashSet::new(),
            max_age: Duration::minutes(5),
            mute: false,
        }
    }

    /// Only accept messages from these guilds. Empty accepts every guild.
    pub fn with_guilds(mut self, guilds: impl IntoIterator<Item = String>) -> Self {
        self.guilds = guilds.into_iter().collect();
        self
    }

    pub fn with_admins(mut self, admins: impl IntoIterator<Item = String>) -> Self {
        self.admins = admins.into_iter().collect();
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_mute(mut self, mute: bool) -> Self {
        self.mute = mute;
        self
    }

    /// Replies are computed but not sent.
    pub fn is_muted(&self) -> bool {
        self.mute
    }

    pub fn review(&self) -> &Arc<ReviewQueue> {
        &self.review
    }

    fn screen(&self, message: &InboundMessage, now: DateTime<Utc>) -> Option<IgnoreReason> {
        if message.author_id == self.self_id {
            return Some(IgnoreReason::OwnMessage);
        }
        if !self.guilds.is_empty() && !self.guilds.contains(&message.guild_id) {
            return Some(IgnoreReason::UnknownGuild);
        }
        if message.content.trim().is_empty() {
            return Some(IgnoreReason::Empty);
        }
        if now.signed_duration_since(message.timestamp) > self.max_age {
            return Some(IgnoreReason::Stale);
        }
        None
    }

    /// Run one message through the bot. Blocking.
    pub fn handle(&self, message: &InboundMessage, now: DateTime<Utc>) -> Result<Outcome> {
        if let Some(reason) = self.screen(message, now) {
            tracing::trace!(id = %message.id, ?reason, "Ignoring message");
            return Ok(Outcome::Ignored(reason));
        }

        if message.edited {
            self.review.remove(&message.id);
        }

        if self.admins.contains(&message.author_id) {
            if let Some(outcome) = self.admin_command(message)? {
                return Ok(outcome);
            }
        }

        match self.bot.reply(&message.author_id, &message.content) {
            Ok(reply) => {
                tracing::info!(id = %message.id, "Reply: {}", reply);
                Ok(Outcome::Reply(reply))
            }
            Err(Error::NoMatch) => {
                tracing::info!(id = %message.id, content = %message.content, "No reply, queued for review");
                self.review.push(PendingMessage {
                    id: message.id.clone(),
                    guild_id: message.guild_id.clone(),
                    channel_id: message.channel_id.clone(),
                    author_id: message.author_id.clone(),
                    author: message.author_name.clone(),
                    content: message.content.clone(),
                    received_at: now,
                });
                Ok(Outcome::Queued)
            }
            Err(e) => Err(e),
        }
    }

    /// Operator commands. `None` when the message is not a command.
    fn admin_command(&self, message: &InboundMessage) -> Result<Option<Outcome>> {
        let content = message.content.trim();
        let (command, args) = content
            .split_once(char::is_whitespace)
            .unwrap_or((content, ""));

        match command {
            RELOAD_COMMAND => {
                self.bot.reload()?;
                Ok(Some(Outcome::Reloaded))
            }
            QUEUE_COMMAND => Ok(Some(Outcome::Pending(self.review.list()))),
            LEARN_COMMAND => {
                let (id, trigger, reply) = parse_learn(args)?;
                let pending = self.review.resolve(&self.bot, id, trigger, reply)?;
                tracing::info!(id, admin = %message.author_id, "Resolved queued message");
                Ok(Some(Outcome::Learned {
                    reply: reply.to_string(),
                    original: pending.into(),
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Split `<id> <trigger> => <reply>`.
fn parse_learn(args: &str) -> Result<(&str, &str, &str)> {
    let usage = || Error::Invalid(format!("usage: {} <id> <trigger> => <reply>", LEARN_COMMAND));
    let (id, rule) = args.trim().split_once(char::is_whitespace).ok_or_else(usage)?;
    let (trigger, reply) = rule.split_once("=>").ok_or_else(usage)?;
    Ok((id, trigger.trim(), reply.trim()))
}

/// Render the review queue for an operator.
pub fn format_pending(pending: &[PendingMessage]) -> String {
    if pending.is_empty() {
        return "No messages awaiting review".to_string();
    }
    pending
        .iter()
        .map(|m| format!("{} | {}: {}", m.id, m.author, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Connection to a chat platform.
#[async_trait]
pub trait ChatTransport: Send {
    /// Next inbound message, or `None` once the platform hung up.
    async fn next_message(&mut self) -> std::io::Result<Option<InboundMessage>>;

    async fn send_reply(&mut self, to: &InboundMessage, reply: &str) -> std::io::Result<()>;

    /// Acknowledge a handled command.
    async fn acknowledge(&mut self, to: &InboundMessage) -> std::io::Result<()> {
        let _ = to;
        Ok(())
    }
}

/// Line-based transport over stdin/stdout.
///
/// Each line is `author: text`; lines without a colon come from `console`.
pub struct ConsoleTransport {
    lines: Lines<BufReader<Stdin>>,
    stdout: Stdout,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a console line into a message.
pub fn parse_console_line(line: &str, now: DateTime<Utc>) -> InboundMessage {
    let (author, content) = match line.split_once(':') {
        Some((author, content)) if !author.trim().is_empty() && !author.contains(' ') => {
            (author.trim(), content.trim())
        }
        _ => ("console", line.trim()),
    };
    InboundMessage {
        id: Uuid::new_v4().to_string(),
        guild_id: "console".to_string(),
        channel_id: "console".to_string(),
        author_id: author.to_string(),
        author_name: author.to_string(),
        content: content.to_string(),
        timestamp: now,
        edited: false,
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn next_message(&mut self) -> std::io::Result<Option<InboundMessage>> {
        Ok(self
            .lines
            .next_line()
            .await?
            .map(|line| parse_console_line(&line, Utc::now())))
    }

    async fn send_reply(&mut self, to: &InboundMessage, reply: &str) -> std::io::Result<()> {
        let line = format!("bot -> {}: {}\n", to.author_name, reply);
        self.stdout.write_all(line.as_bytes()).await?;
        self.stdout.flush().await
    }

    async fn acknowledge(&mut self, to: &InboundMessage) -> std::io::Result<()> {
        let line = format!("bot: ✅ ({})\n", to.content);
        self.stdout.write_all(line.as_bytes()).await?;
        self.stdout.flush().await
    }
}

/// Pump messages until the transport closes or a fatal error occurs.
pub async fn run<T: ChatTransport>(transport: &mut T, gate: Arc<MessageGate>) -> anyhow::Result<()> {
    while let Some(message) = transport.next_message().await? {
        let handler = gate.clone();
        let inbound = message.clone();
        let outcome =
            tokio::task::spawn_blocking(move || handler.handle(&inbound, Utc::now())).await?;

        match outcome {
            Ok(Outcome::Reply(reply)) => {
                if gate.is_muted() {
                    continue;
                }
                if let Err(e) = transport.send_reply(&message, &reply).await {
                    tracing::warn!("Failed to send reply: {}", e);
                }
            }
            Ok(Outcome::Reloaded) => {
                if let Err(e) = transport.acknowledge(&message).await {
                    tracing::warn!("Failed to acknowledge reload: {}", e);
                }
            }
            Ok(Outcome::Pending(pending)) => {
                if let Err(e) = transport.send_reply(&message, &format_pending(&pending)).await {
                    tracing::warn!("Failed to list review queue: {}", e);
                }
            }
            Ok(Outcome::Learned { reply, original }) => {
                if !gate.is_muted() {
                    if let Err(e) = transport.send_reply(&original, &reply).await {
                        tracing::warn!(id = %original.id, "Failed to send taught reply: {}", e);
                    }
                }
                if let Err(e) = transport.acknowledge(&message).await {
                    tracing::warn!("Failed to acknowledge learn: {}", e);
                }
            }
            Ok(Outcome::Queued) | Ok(Outcome::Ignored(_)) => {}
            Err(e) if e.is_fatal() => {
                tracing::error!("Fatal error, shutting down: {}", e);
                return Err(e.into());
            }
            Err(e) => tracing::warn!(id = %message.id, "Failed to handle message: {}", e),
        }
    }
    tracing::info!("Transport closed");
    Ok(())
}
