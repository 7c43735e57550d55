//! Per-channel history pagination.
//!
//! [`ChannelHarvester`] walks a channel forward in id order, one page of
//! [`PAGE_SIZE`] messages at a time, and hands messages out oldest first.
//! It is single-pass: once it returns `None` it stays exhausted.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{debug, info, warn};

use crate::api::{get_json, ApiError, ChatApi};
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{ChannelProgress, Message};
use crate::snowflake::Snowflake;

pub const PAGE_SIZE: usize = 100;

/// Fixed-delay retry for transport and status failures. Forbidden ends the
/// channel normally and an undecodable page fails it without retrying.
///
/// `max_attempts: None` retries forever; a channel can then stall on a
/// persistently failing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

pub struct ChannelHarvester<A: ChatApi + ?Sized> {
    api: Arc<A>,
    progress: Arc<ChannelProgress>,
    retry: RetryPolicy,
    cursor: Snowflake,
    /// Current page, newest first; `pop` yields the oldest.
    page: Vec<Message>,
    exhausted: bool,
}

impl<A: ChatApi + ?Sized> ChannelHarvester<A> {
    pub fn new(api: Arc<A>, progress: Arc<ChannelProgress>, retry: RetryPolicy) -> Self {
        Self {
            api,
            progress,
            retry,
            cursor: Snowflake::ZERO,
            page: Vec::new(),
            exhausted: false,
        }
    }

    /// Id of the newest message fetched so far.
    pub fn cursor(&self) -> Snowflake {
        self.cursor
    }

    /// Next message in ascending id order, `None` once history is exhausted
    /// or access was revoked.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.page.pop() {
                return Ok(Some(message));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Message>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut harvester = state?;
            match harvester.next_message().await {
                Ok(Some(message)) => Some((Ok(message), Some(harvester))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let channel = self.progress.channel();
        let path = format!("channels/{}/messages", channel.id);
        let query = [
            ("limit", PAGE_SIZE.to_string()),
            ("after", self.cursor.to_string()),
        ];
        let mut failures: u32 = 0;

        loop {
            match get_json::<Vec<Message>, A>(self.api.as_ref(), &path, &query).await {
                Ok(mut page) => {
                    let received = page.len();
                    let cursor = self.cursor;
                    page.retain(|m| m.id > cursor);
                    page.sort_unstable_by(|a, b| b.id.cmp(&a.id));

                    // A page that does not move the cursor forward would be
                    // requested again forever.
                    let Some(newest) = page.first().map(|m| m.id) else {
                        debug!(channel = %channel.name, received, "History exhausted");
                        self.exhausted = true;
                        return Ok(());
                    };

                    self.cursor = newest;
                    self.progress.add_fetched(page.len() as u64);
                    metrics::record_page(page.len());
                    self.page = page;
                    return Ok(());
                }
                Err(err) if err.is_forbidden() => {
                    info!(
                        channel = %channel.name,
                        fetched = self.progress.fetched(),
                        "Access forbidden, keeping partial history"
                    );
                    self.exhausted = true;
                    return Ok(());
                }
                // The same page would fail to decode again.
                Err(err @ ApiError::Decode(_)) => {
                    warn!(channel = %channel.name, "Malformed page, giving up: {}", err);
                    return Err(err.into());
                }
                Err(err) => {
                    failures += 1;
                    metrics::record_retry();

                    if let Some(max) = self.retry.max_attempts {
                        if failures >= max {
                            return Err(Error::RetriesExhausted {
                                channel: channel.name.clone(),
                                attempts: failures,
                            });
                        }
                    }

                    warn!(
                        channel = %channel.name,
                        attempt = failures,
                        delay_ms = self.retry.delay.as_millis() as u64,
                        "Page fetch failed, retrying: {}",
                        err
                    );
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{channel, message_json, ScriptedApi};
    use futures::StreamExt;
    use serde_json::json;

    fn page(ids: &[u64]) -> std::result::Result<serde_json::Value, ApiError> {
        Ok(json!(ids.iter().map(|id| message_json(*id, "alice", "hi")).collect::<Vec<_>>()))
    }

    fn harvester(api: &Arc<ScriptedApi>, retry: RetryPolicy) -> ChannelHarvester<ScriptedApi> {
        let progress = Arc::new(ChannelProgress::new(channel(42, "general")));
        ChannelHarvester::new(api.clone(), progress, retry)
    }

    async fn drain(h: &mut ChannelHarvester<ScriptedApi>) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        while let Some(m) = h.next_message().await? {
            ids.push(m.id.0);
        }
        Ok(ids)
    }

    #[tokio::test(start_paused = true)]
    async fn yields_pages_in_ascending_order() {
        let api = Arc::new(ScriptedApi::new());
        api.push("channels/42/messages", page(&[5, 4, 3]));
        api.push("channels/42/messages", page(&[8, 7, 6]));
        api.push("channels/42/messages", page(&[]));

        let mut h = harvester(&api, RetryPolicy::default());
        assert_eq!(drain(&mut h).await.unwrap(), vec![3, 4, 5, 6, 7, 8]);
        assert_eq!(h.progress.fetched(), 6);
        assert_eq!(h.cursor(), Snowflake(8));

        let afters: Vec<_> = api.calls().iter().map(|c| c.query_value("after")).collect();
        assert_eq!(afters, vec!["0", "5", "8"]);
        assert!(api.calls().iter().all(|c| c.query_value("limit") == "100"));
    }

    #[tokio::test(start_paused = true)]
    async fn stays_exhausted_after_end() {
        let api = Arc::new(ScriptedApi::new());
        api.push("channels/42/messages", page(&[1]));

        let mut h = harvester(&api, RetryPolicy::default());
        assert_eq!(drain(&mut h).await.unwrap(), vec![1]);
        assert!(h.next_message().await.unwrap().is_none());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sorts_out_of_order_wire_pages() {
        let api = Arc::new(ScriptedApi::new());
        api.push("channels/42/messages", page(&[10, 30, 20]));

        let mut h = harvester(&api, RetryPolicy::default());
        assert_eq!(drain(&mut h).await.unwrap(), vec![10, 20, 30]);
        assert_eq!(h.cursor(), Snowflake(30));
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_on_third_page_keeps_earlier_pages() {
        let api = Arc::new(ScriptedApi::new());
        api.push("channels/42/messages", page(&[2, 1]));
        api.push("channels/42/messages", page(&[4, 3]));
        api.push("channels/42/messages", Err(ApiError::Forbidden));

        let mut h = harvester(&api, RetryPolicy::default());
        assert_eq!(drain(&mut h).await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(h.progress.fetched(), 4);
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_with_fixed_delay() {
        let api = Arc::new(ScriptedApi::new());
        api.push(
            "channels/42/messages",
            Err(ApiError::Status { status: 500, body: "oops".into() }),
        );
        api.push("channels/42/messages", Err(ApiError::Network("reset".into())));
        api.push("channels/42/messages", page(&[9]));

        let started = tokio::time::Instant::now();
        let mut h = harvester(&api, RetryPolicy::default());
        assert_eq!(drain(&mut h).await.unwrap(), vec![9]);

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));

        let afters: Vec<_> = api.calls().iter().map(|c| c.query_value("after")).collect();
        assert_eq!(afters, vec!["0", "0", "0", "9"]);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_attempt_ceiling_is_configured() {
        let api = Arc::new(ScriptedApi::new());
        for _ in 0..5 {
            api.push("channels/42/messages", Err(ApiError::Network("down".into())));
        }

        let retry = RetryPolicy {
            delay: Duration::from_millis(10),
            max_attempts: Some(3),
        };
        let mut h = harvester(&api, retry);
        let err = h.next_message().await.unwrap_err();

        assert!(matches!(err, Error::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(api.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_page_fails_without_retrying() {
        let api = Arc::new(ScriptedApi::new());
        api.push("channels/42/messages", page(&[2, 1]));
        api.push("channels/42/messages", Ok(json!([{"id": "3", "content": 17}])));
        api.push("channels/42/messages", page(&[3]));

        let mut h = harvester(&api, RetryPolicy::default());
        let err = drain(&mut h).await.unwrap_err();

        assert!(matches!(err, Error::Api(ApiError::Decode(_))));
        assert_eq!(api.calls().len(), 2);
        assert_eq!(h.progress.fetched(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn null_content_is_harvested_as_empty_text() {
        let api = Arc::new(ScriptedApi::new());
        api.push(
            "channels/42/messages",
            Ok(json!([{
                "id": "7",
                "type": 0,
                "content": null,
                "author": {"id": "1", "username": "alice"},
                "attachments": null,
                "mentions": null
            }])),
        );

        let mut h = harvester(&api, RetryPolicy::default());
        let message = h.next_message().await.unwrap().unwrap();
        assert_eq!(message.id, Snowflake(7));
        assert!(message.content.is_empty());
        assert!(h.next_message().await.unwrap().is_none());
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_at_or_before_cursor_are_not_counted() {
        let api = Arc::new(ScriptedApi::new());
        api.push("channels/42/messages", page(&[5, 4, 3]));
        api.push("channels/42/messages", page(&[6, 5]));

        let mut h = harvester(&api, RetryPolicy::default());
        assert_eq!(drain(&mut h).await.unwrap(), vec![3, 4, 5, 6]);
        assert_eq!(h.progress.fetched(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_channel_ends_immediately() {
        let api = Arc::new(ScriptedApi::new());
        let mut h = harvester(&api, RetryPolicy::default());
        assert!(h.next_message().await.unwrap().is_none());
        assert_eq!(h.progress.fetched(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_adapter_yields_same_sequence() {
        let api = Arc::new(ScriptedApi::new());
        api.push("channels/42/messages", page(&[3, 2, 1]));

        let ids: Vec<u64> = harvester(&api, RetryPolicy::default())
            .into_stream()
            .map(|m| m.unwrap().id.0)
            .collect()
            .await;
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
