//! Message formatting for dump files.
//!
//! A [`MessageFormatter`] is created per channel. It appends each written
//! message to an internal buffer and hands the buffer over on [`flush`],
//! so the writer never sees the same text twice.
//!
//! [`flush`]: MessageFormatter::flush

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;
use crate::model::{Message, MessageKind, User};
use crate::snowflake::Snowflake;

/// Output style, chosen once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Chat log with day separators.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
    /// Compact one-line-per-message log with full dates.
    Log,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::Log => "log",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" | "jsonl" => Ok(OutputFormat::Json),
            "log" => Ok(OutputFormat::Log),
            other => Err(Error::InvalidArgument(format!(
                "unknown format '{}', must be `json`, `text`, or `log`",
                other
            ))),
        }
    }
}

pub struct MessageFormatter {
    format: OutputFormat,
    last_day: Option<i64>,
    buffer: String,
}

impl MessageFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            last_day: None,
            buffer: String::new(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Append one message. Only the JSON style can fail, when the record
    /// does not serialize; nothing is appended in that case.
    pub fn write(&mut self, message: &Message) -> crate::Result<()> {
        match self.format {
            OutputFormat::Text => self.write_text(message),
            OutputFormat::Json => self.write_json(message)?,
            OutputFormat::Log => self.write_log(message),
        }
        Ok(())
    }

    /// Take everything written since the previous flush.
    pub fn flush(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn write_text(&mut self, message: &Message) {
        let day = message.id.day_index();
        if self.last_day != Some(day) {
            if self.last_day.is_some() {
                self.buffer.push('\n');
            }
            self.buffer.push_str(&separator_line(message.id));
            self.buffer.push('\n');
        }
        self.last_day = Some(day);

        let date = message.id.datetime();
        let mut line = format!("[{}]", date.format("%H:%M:%S"));
        let author = message.author.as_ref().filter(|u| !u.username.is_empty());

        if let Some(user) = author {
            line.push(' ');
            line.push_str(&user.username);
        }

        let text = message_text(message);
        if !text.is_empty() {
            line.push_str(if author.is_some() { ": " } else { " " });
            line.push_str(&text);
        }

        self.buffer.push_str(&line);
        self.buffer.push('\n');

        if !message.attachments.is_empty() {
            for attachment in &message.attachments {
                self.buffer.push_str(&attachment.url);
                self.buffer.push('\n');
            }
            self.buffer.push('\n');
        }
    }

    fn write_log(&mut self, message: &Message) {
        let date = message.id.datetime();
        let mut line = format!(
            "[{}] {}: {}",
            date.format("%d/%m/%Y %H:%M:%S"),
            message.author_name(),
            message_text(message)
        );
        for attachment in &message.attachments {
            line.push(' ');
            line.push_str(&attachment.url);
        }
        self.buffer.push_str(line.trim_end());
        self.buffer.push('\n');
    }

    fn write_json(&mut self, message: &Message) -> crate::Result<()> {
        let record = JsonRecord {
            id: message.id,
            timestamp: message.id.datetime().to_rfc3339(),
            kind: message.kind.into(),
            author: message.author.as_ref(),
            content: &message.content,
            text: message_text(message),
            attachments: message.attachments.iter().map(|a| a.url.as_str()).collect(),
            reference: message
                .message_reference
                .as_ref()
                .and_then(|r| r.message_id),
        };

        let line = serde_json::to_string(&record)?;
        self.buffer.push_str(&line);
        self.buffer.push('\n');
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    id: Snowflake,
    timestamp: String,
    #[serde(rename = "type")]
    kind: u64,
    author: Option<&'a User>,
    content: &'a str,
    text: String,
    attachments: Vec<&'a str>,
    reference: Option<Snowflake>,
}

/// `---- 4 March 2020 ----`
pub fn separator_line(id: Snowflake) -> String {
    format!("---- {} ----", id.datetime().format("%-d %B %Y"))
}

fn format_users(users: &[User]) -> String {
    users.iter().map(User::tag).collect::<Vec<_>>().join(", ")
}

/// The author acted on themselves (joined or left rather than added or
/// removed someone). A missing mention list counts as self-referential.
fn is_self_action(message: &Message) -> bool {
    match (message.author.as_ref(), message.mentions.first()) {
        (Some(author), Some(target)) => author.id == target.id,
        _ => true,
    }
}

/// Render the human-readable text of a message according to its type.
pub fn message_text(message: &Message) -> String {
    let author = message.author_name();

    match message.kind {
        MessageKind::Default => message.content.clone(),
        MessageKind::RecipientAdd => {
            if is_self_action(message) {
                format!("{} joined the group chat", author)
            } else {
                format!(
                    "{} added {} to the group chat",
                    author,
                    format_users(&message.mentions)
                )
            }
        }
        MessageKind::RecipientRemove => {
            if is_self_action(message) {
                format!("{} left the group chat", author)
            } else {
                format!(
                    "{} removed {} from the group chat",
                    author,
                    format_users(&message.mentions)
                )
            }
        }
        MessageKind::Call => format!("{} called.", author),
        MessageKind::ChannelNameChange => {
            format!("{} set the group chat title to {}", author, message.content)
        }
        MessageKind::ChannelIconChange => format!("{} changed the group chat icon", author),
        MessageKind::ChannelPinnedMessage => {
            let mut text = format!("{} pinned a message to this channel", author);
            if let Some(id) = message
                .message_reference
                .as_ref()
                .and_then(|r| r.message_id)
            {
                text.push_str(&format!(" ({})", id));
            }
            text
        }
        MessageKind::GuildMemberJoin => format!("{} has joined the server", author),
        MessageKind::GuildBoost(_) => format!("{} has boosted the server", author),
        MessageKind::ChannelFollowAdd => format!("{} has followed a server", author),
        MessageKind::Unknown(code) => format!("INVALID_TYPE_{}", code),
    }
}
