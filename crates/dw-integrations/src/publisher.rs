//! Topic publishing for alerts and metrics.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{truncate_body, RemoteError, Result};

/// One message as delivered to a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    pub payload: Value,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Posts `{"topic", "payload"}` to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpPublisher {
    pub fn new(url: impl Into<String>, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(RemoteError::Http)?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        let message = TopicMessage {
            topic: topic.to_string(),
            payload,
        };
        let resp = self
            .client
            .post(&self.url)
            .json(&message)
            .send()
            .await
            .map_err(|e| RemoteError::from_reqwest(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log
// ---------------------------------------------------------------------------

/// Writes each message as a structured log event. Used when no sink URL is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        tracing::info!(target: "driftwarden::publish", topic, payload = %payload, "published");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------------

/// Keeps every message in memory, or rejects every message when built with
/// [`MemoryPublisher::failing`].
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<TopicMessage>>,
    fail: bool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn messages(&self) -> Vec<TopicMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads published to `topic`, oldest first.
    pub fn on_topic(&self, topic: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: Value) -> Result<()> {
        if self.fail {
            return Err(RemoteError::Status {
                status: 503,
                body: format!("topic `{topic}` unavailable"),
            });
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TopicMessage {
                topic: topic.to_string(),
                payload,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_publisher_groups_by_topic() {
        let p = MemoryPublisher::new();
        p.publish("a", json!(1)).await.unwrap();
        p.publish("b", json!(2)).await.unwrap();
        p.publish("a", json!(3)).await.unwrap();
        assert_eq!(p.on_topic("a"), vec![json!(1), json!(3)]);
        assert_eq!(p.messages().len(), 3);
    }

    #[tokio::test]
    async fn failing_publisher_rejects_and_keeps_nothing() {
        let p = MemoryPublisher::failing();
        assert!(p.publish("a", json!(1)).await.is_err());
        assert!(p.messages().is_empty());
    }

    #[tokio::test]
    async fn log_publisher_always_succeeds() {
        assert!(LogPublisher.publish("metrics", json!({"x": 1})).await.is_ok());
    }
}
