//! Configuration for the dumper
//!
//! Loads configuration from fulldump.yml; command-line flags override it.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::api::DEFAULT_API_URL;
use crate::debounce::DEFAULT_THROTTLE;
use crate::dumper::DEFAULT_CONCURRENCY;
use crate::error::{Error, Result};
use crate::format::OutputFormat;
use crate::harvest::RetryPolicy;

/// Default config file, looked up in the working directory and its parent
pub const CONFIG_FILE: &str = "fulldump.yml";
pub const DEFAULT_DIR: &str = "dumps";
pub const TOKEN_ENV: &str = "DISCORD_TOKEN";
pub const API_URL_ENV: &str = "FULLDUMP_API_URL";

#[derive(Debug, Default, Deserialize)]
struct YamlConfig {
    api: Option<ApiConfig>,
    dump: Option<DumpConfig>,
    retry: Option<RetryConfig>,
    render: Option<RenderConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiConfig {
    base_url: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DumpConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    concurrency: Option<String>,
    format: Option<String>,
    dir: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    delay_ms: Option<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    max_attempts: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RenderConfig {
    #[serde(default, deserialize_with = "deserialize_string_or_number")]
    throttle_ms: Option<String>,
}

/// Deserialize a value that can be either a string or a number
fn deserialize_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let value: Option<serde_yaml::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}

/// Main configuration struct
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_base_url: String,
    /// Empty when neither the file nor the environment provides one.
    pub token: String,
    pub concurrency: usize,
    pub format: OutputFormat,
    pub dir: PathBuf,
    /// Overrides the account's username as the dump folder name.
    pub name: Option<String>,
    pub retry_delay: Duration,
    pub retry_max_attempts: Option<u32>,
    pub throttle: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load configuration from fulldump.yml, ../fulldump.yml, or defaults
    pub fn new() -> Self {
        Self::load_from_file(CONFIG_FILE)
            .or_else(|_| Self::load_from_file(Path::new("..").join(CONFIG_FILE)))
            .unwrap_or_else(|_| {
                Self::load_dotenv();
                Self::defaults().with_env()
            })
    }

    /// Resolve a value: `${VAR}` placeholders are read from the environment
    fn resolve_placeholder(value: Option<String>) -> Option<String> {
        let v = value?;
        if v.starts_with("${") && v.ends_with('}') {
            return std::env::var(&v[2..v.len() - 1]).ok();
        }
        Some(v)
    }

    /// Resolve a string, with the explicit env var taking precedence
    fn resolve_env_string(value: Option<String>, env_key: &str) -> Option<String> {
        if let Ok(env_val) = std::env::var(env_key) {
            if !env_val.is_empty() {
                return Some(env_val);
            }
        }
        Self::resolve_placeholder(value)
    }

    /// Resolve a number from a literal or a `${VAR}` placeholder
    fn resolve_number<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>> {
        match Self::resolve_placeholder(value) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|_| Error::ConfigError(format!("{} must be a number, got {:?}", key, raw))),
        }
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        // Try to load from current directory first, then parent
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    fn with_env(mut self) -> Self {
        if let Some(token) = Self::resolve_env_string(None, TOKEN_ENV) {
            self.token = token;
        }
        if let Some(url) = Self::resolve_env_string(None, API_URL_ENV) {
            self.api_base_url = url;
        }
        self
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_dotenv();

        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let yaml: YamlConfig = if content.trim().is_empty() {
            YamlConfig::default()
        } else {
            serde_yaml::from_str(content)?
        };

        let api = yaml.api.unwrap_or_default();
        let dump = yaml.dump.unwrap_or_default();
        let retry = yaml.retry.unwrap_or_default();
        let render = yaml.render.unwrap_or_default();
        let defaults = Self::defaults();

        let format = match Self::resolve_placeholder(dump.format) {
            Some(raw) => raw.parse::<OutputFormat>()?,
            None => defaults.format,
        };

        Ok(Self {
            api_base_url: Self::resolve_env_string(api.base_url, API_URL_ENV)
                .unwrap_or(defaults.api_base_url),
            token: Self::resolve_env_string(api.token, TOKEN_ENV).unwrap_or_default(),
            concurrency: Self::resolve_number(dump.concurrency, "dump.concurrency")?
                .unwrap_or(defaults.concurrency),
            format,
            dir: Self::resolve_placeholder(dump.dir)
                .map(PathBuf::from)
                .unwrap_or(defaults.dir),
            name: Self::resolve_placeholder(dump.name).filter(|n| !n.is_empty()),
            retry_delay: Self::resolve_number(retry.delay_ms, "retry.delay_ms")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            retry_max_attempts: Self::resolve_number::<u32>(retry.max_attempts, "retry.max_attempts")?
                .filter(|n| *n > 0),
            throttle: Self::resolve_number(render.throttle_ms, "render.throttle_ms")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.throttle),
        })
    }

    /// Built-in defaults; the token must come from the file, env or CLI
    fn defaults() -> Self {
        let retry = RetryPolicy::default();
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            token: String::new(),
            concurrency: DEFAULT_CONCURRENCY,
            format: OutputFormat::default(),
            dir: PathBuf::from(DEFAULT_DIR),
            name: None,
            retry_delay: retry.delay,
            retry_max_attempts: retry.max_attempts,
            throttle: DEFAULT_THROTTLE,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: self.retry_delay,
            max_attempts: self.retry_max_attempts,
        }
    }
}
