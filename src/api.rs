//! Minimal REST client for the chat service.
//!
//! The harvesting pipeline only needs `GET(path, query) -> JSON`, with
//! "forbidden" told apart from every other failure. [`ChatApi`] is that seam;
//! [`HttpChatApi`] implements it over reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://discordapp.com/api/v6";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// HTTP 403: access revoked or never granted.
    #[error("forbidden")]
    Forbidden,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Network(String),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, ApiError::Forbidden)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Network(err.to_string())
    }
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<Value, ApiError>;
}

/// GET a path and decode the body into `T`.
pub async fn get_json<T, A>(api: &A, path: &str, query: &[(&str, String)]) -> std::result::Result<T, ApiError>
where
    T: DeserializeOwned,
    A: ChatApi + ?Sized,
{
    let value = api.get(path, query).await?;
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct HttpChatApi {
    http: Client,
    token: String,
    base_url: String,
}

impl HttpChatApi {
    /// Create client against the public API.
    pub fn new<S: Into<String>>(token: S) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_API_URL)
    }

    /// Create client with custom base url (primarily for tests).
    pub fn with_base_url<S1: Into<String>, S2: Into<String>>(token: S1, base_url: S2) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::InvalidArgument("API token is empty".to_string()));
        }

        let http = Client::builder()
            .user_agent(format!("fulldump/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::InvalidArgument(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> std::result::Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(%url, ?query, "GET");

        let response = self
            .http
            .get(&url)
            .header("authorization", &self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::FORBIDDEN {
            return Err(ApiError::Forbidden);
        }

        let text = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode(format!("{} ({})", text, e)))
    }
}
