//! Full chat history dumper
//!
//! This library provides tools to:
//! - Discover the channels of an account (guild text channels and DMs)
//! - Page through each channel's complete history, oldest message first
//! - Write every channel to its own file as text, compact log lines or JSON Lines
//! - Run many channels at once under a fixed concurrency limit
//! - Show live per-channel progress on a redrawing terminal dashboard

pub mod api;
pub mod config;
pub mod dashboard;
pub mod debounce;
pub mod discovery;
pub mod dumper;
pub mod error;
pub mod format;
pub mod harvest;
pub mod limiter;
pub mod metrics;
pub mod model;
pub mod paths;
pub mod snowflake;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export common types
pub use api::{ApiError, ChatApi, HttpChatApi};
pub use config::Config;
pub use dashboard::StatusBoard;
pub use discovery::{discover, AcceptAll, DumpTargets, GuildSelector, PromptSelector};
pub use dumper::{ChannelOutcome, DumpSettings, DumpSummary, Dumper};
pub use error::{Error, Result};
pub use format::{MessageFormatter, OutputFormat};
pub use harvest::{ChannelHarvester, RetryPolicy};
pub use model::{Channel, ChannelProgress, Message, MessageKind};
pub use paths::OutputLayout;
pub use snowflake::Snowflake;
