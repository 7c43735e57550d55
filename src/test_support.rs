//! Scripted chat API and fixtures shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{ApiError, ChatApi};
use crate::model::{Channel, GuildRef};
use crate::snowflake::Snowflake;

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Call {
    pub fn query_value(&self, key: &str) -> String {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }
}

/// Answers each path from a queue of canned responses; an exhausted queue
/// answers with an empty JSON array.
#[derive(Default)]
pub struct ScriptedApi {
    responses: Mutex<HashMap<String, VecDeque<Result<Value, ApiError>>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, response: Result<Value, ApiError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatApi for ScriptedApi {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(Call {
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });

        let next = self
            .responses
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(|queue| queue.pop_front());

        // Yield so concurrent callers interleave like real requests.
        tokio::task::yield_now().await;
        next.unwrap_or_else(|| Ok(json!([])))
    }
}

pub fn message_json(id: u64, author: &str, content: &str) -> Value {
    json!({
        "id": id.to_string(),
        "type": 0,
        "content": content,
        "author": {"id": "1", "username": author, "discriminator": "0001"},
        "attachments": [],
        "mentions": []
    })
}

pub fn channel(id: u64, name: &str) -> Channel {
    Channel {
        id: Snowflake(id),
        name: name.to_string(),
        guild: Some(GuildRef {
            id: Snowflake(1),
            name: "Guild".to_string(),
        }),
    }
}

pub fn dm_channel(id: u64, name: &str) -> Channel {
    Channel {
        id: Snowflake(id),
        name: name.to_string(),
        guild: None,
    }
}
