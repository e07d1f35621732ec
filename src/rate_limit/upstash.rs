//! Counter store backed by the Upstash Redis REST API.
//!
//! Commands are JSON arrays posted to the database URL; several commands go
//! to `/pipeline` and come back as one result per command, in order.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::CounterStore;
use crate::error::AppError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct CommandReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Redis counters reached over HTTPS.
pub struct UpstashCounterStore {
    client: Client,
    base_url: String,
    token: String,
}

impl UpstashCounterStore {
    pub fn new(base_url: &str, token: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::configuration(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn post(&self, url: String, body: Value) -> Result<String, AppError> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::counter_store(format!("counter store request failed: {err}")))?;

        let status = response.status();
        let text = response.text().await.map_err(|err| {
            AppError::counter_store(format!("failed to read counter store reply: {err}"))
        })?;
        if !status.is_success() {
            return Err(AppError::counter_store(format!(
                "counter store returned HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }
        Ok(text)
    }

    async fn command(&self, args: Value) -> Result<Value, AppError> {
        let text = self.post(self.base_url.clone(), args).await?;
        let reply = serde_json::from_str::<CommandReply>(&text).map_err(|err| {
            AppError::counter_store(format!("invalid counter store reply: {err}"))
        })?;
        reply_result(reply)
    }
}

#[async_trait]
impl CounterStore for UpstashCounterStore {
    async fn incr_batch(&self, keys: &[String]) -> Result<Vec<u64>, AppError> {
        let commands = keys.iter().map(|key| json!(["INCR", key])).collect::<Vec<_>>();
        let text = self
            .post(format!("{}/pipeline", self.base_url), Value::Array(commands))
            .await?;
        let replies = serde_json::from_str::<Vec<CommandReply>>(&text).map_err(|err| {
            AppError::counter_store(format!("invalid counter store pipeline reply: {err}"))
        })?;
        if replies.len() != keys.len() {
            return Err(AppError::counter_store(format!(
                "counter store returned {} replies for {} commands",
                replies.len(),
                keys.len()
            )));
        }

        replies
            .into_iter()
            .map(|reply| {
                reply_result(reply)?
                    .as_u64()
                    .ok_or_else(|| AppError::counter_store("INCR reply is not an integer"))
            })
            .collect()
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), AppError> {
        self.command(json!(["EXPIRE", key, ttl.as_secs().max(1)]))
            .await
            .map(|_| ())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, AppError> {
        let seconds = self
            .command(json!(["TTL", key]))
            .await?
            .as_i64()
            .ok_or_else(|| AppError::counter_store("TTL reply is not an integer"))?;
        Ok(ttl_from_reply(seconds))
    }
}

fn reply_result(reply: CommandReply) -> Result<Value, AppError> {
    if let Some(error) = reply.error {
        return Err(AppError::counter_store(format!("counter store error: {error}")));
    }
    reply
        .result
        .ok_or_else(|| AppError::counter_store("counter store reply has no result"))
}

/// Redis `TTL` answers `-2` for a missing key and `-1` for a key without expiry.
fn ttl_from_reply(seconds: i64) -> Option<Duration> {
    u64::try_from(seconds).ok().map(Duration::from_secs)
}
