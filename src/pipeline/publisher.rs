//! Publisher: delivers a finished record to a topic.
//!
//! [`RestProxyPublisher`] talks to a Kafka REST proxy (v2 API, binary
//! embedded format). Each call builds its own client, so no connection
//! outlives a single publish attempt. Only the connection attempt is time
//! bounded; once connected, the publish waits for the proxy to answer.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::BrokerConfig;
use crate::core::task::TaskError;

const BINARY_CONTENT_TYPE: &str = "application/vnd.kafka.binary.v2+json";
const V2_ACCEPT: &str = "application/vnd.kafka.v2+json";

/// Errors publishing a record.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker was unreachable or did not answer in time.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The broker answered but refused the record.
    #[error("broker rejected record with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The record could not be encoded.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<PublishError> for TaskError {
    fn from(err: PublishError) -> Self {
        TaskError::Publish(err.to_string())
    }
}

/// Accepts a serialized record for a topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Publishes through a Kafka REST proxy.
#[derive(Debug, Clone)]
pub struct RestProxyPublisher {
    base_url: String,
    connect_timeout: Duration,
}

impl RestProxyPublisher {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            connect_timeout: config.connect_timeout(),
        }
    }

    /// `POST` target for a topic.
    pub fn endpoint(&self, topic: &str) -> String {
        format!("{}/topics/{}", self.base_url, topic)
    }

    /// Request body carrying one base64-encoded record.
    pub fn request_body(payload: &[u8]) -> Value {
        json!({
            "records": [
                { "value": BASE64.encode(payload) }
            ]
        })
    }
}

#[async_trait]
impl Publisher for RestProxyPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()?;

        let endpoint = self.endpoint(topic);
        let body = serde_json::to_vec(&Self::request_body(payload))?;
        debug!(%endpoint, bytes = payload.len(), "publishing record");

        let response = client
            .post(&endpoint)
            .header(CONTENT_TYPE, BINARY_CONTENT_TYPE)
            .header(ACCEPT, V2_ACCEPT)
            .body(body)
            .send()
            .await
            .inspect_err(|e| error!(%endpoint, error = %e, "broker unreachable"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%endpoint, status = status.as_u16(), %body, "broker rejected record");
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
