//! Wire and domain types: users, guilds, channels and messages.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize};

use crate::snowflake::Snowflake;

/// Channel type code for guild text channels.
pub const GUILD_TEXT: u8 = 0;

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Snowflake,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default)]
    pub discriminator: Option<String>,
}

impl User {
    /// `name#1234`, or the bare name for accounts without a discriminator.
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(default)]
    pub message_id: Option<Snowflake>,
}

/// Message type tag. Codes outside the known set are kept in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u64", into = "u64")]
pub enum MessageKind {
    Default,
    RecipientAdd,
    RecipientRemove,
    Call,
    ChannelNameChange,
    ChannelIconChange,
    ChannelPinnedMessage,
    GuildMemberJoin,
    /// Boost at tier 0..=3.
    GuildBoost(u8),
    ChannelFollowAdd,
    Unknown(u64),
}

impl Default for MessageKind {
    fn default() -> Self {
        MessageKind::Default
    }
}

impl From<u64> for MessageKind {
    fn from(code: u64) -> Self {
        match code {
            0 => MessageKind::Default,
            1 => MessageKind::RecipientAdd,
            2 => MessageKind::RecipientRemove,
            3 => MessageKind::Call,
            4 => MessageKind::ChannelNameChange,
            5 => MessageKind::ChannelIconChange,
            6 => MessageKind::ChannelPinnedMessage,
            7 => MessageKind::GuildMemberJoin,
            8..=11 => MessageKind::GuildBoost((code - 8) as u8),
            12 => MessageKind::ChannelFollowAdd,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u64 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Default => 0,
            MessageKind::RecipientAdd => 1,
            MessageKind::RecipientRemove => 2,
            MessageKind::Call => 3,
            MessageKind::ChannelNameChange => 4,
            MessageKind::ChannelIconChange => 5,
            MessageKind::ChannelPinnedMessage => 6,
            MessageKind::GuildMemberJoin => 7,
            MessageKind::GuildBoost(tier) => 8 + u64::from(tier),
            MessageKind::ChannelFollowAdd => 12,
            MessageKind::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Snowflake,
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: MessageKind,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mentions: Vec<User>,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
}

impl Message {
    pub fn author_name(&self) -> &str {
        match &self.author {
            Some(user) if !user.username.is_empty() => &user.username,
            _ => "Unknown user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub owner: bool,
    #[serde(default, deserialize_with = "deserialize_permissions")]
    pub permissions: u64,
}

impl Guild {
    const ADMINISTRATOR: u64 = 0x8;

    pub fn is_admin(&self) -> bool {
        self.permissions & Self::ADMINISTRATOR != 0
    }
}

/// Permission bitsets arrive as numbers on older API versions and as strings
/// on newer ones.
fn deserialize_permissions<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(serde_json::Value::String(s)) => s.parse().map_err(D::Error::custom),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom("permissions out of range")),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Raw channel object as returned by the discovery endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RawChannel {
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipients: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRef {
    pub id: Snowflake,
    pub name: String,
}

/// A channel selected for harvesting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: Snowflake,
    pub name: String,
    pub guild: Option<GuildRef>,
}

impl Channel {
    pub fn from_raw(raw: RawChannel, guild: Option<&Guild>) -> Self {
        let name = match raw.name {
            Some(name) if !name.is_empty() => name,
            _ => raw
                .recipients
                .iter()
                .map(|u| u.username.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        };

        Self {
            id: raw.id,
            name,
            guild: guild.map(|g| GuildRef {
                id: g.id,
                name: g.name.clone(),
            }),
        }
    }

    pub fn is_direct_message(&self) -> bool {
        self.guild.is_none()
    }
}

/// Live per-channel progress, shared between a harvest task and the
/// dashboard.
#[derive(Debug)]
pub struct ChannelProgress {
    channel: Channel,
    fetched: AtomicU64,
    finished: AtomicBool,
}

impl ChannelProgress {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            fetched: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn fetched(&self) -> u64 {
        self.fetched.load(Ordering::Acquire)
    }

    pub fn add_fetched(&self, count: u64) {
        self.fetched.fetch_add(count, Ordering::AcqRel);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// One-way transition; calling it again is a no-op.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}
