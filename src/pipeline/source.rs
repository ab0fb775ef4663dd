//! Record source: where raw users come from.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::record::RawUser;
use crate::config::SourceConfig;
use crate::core::task::TaskError;

/// Errors fetching a record.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The source answered with a non-success status.
    #[error("source returned HTTP {0}")]
    Status(u16),

    /// The body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// `results` was missing or empty.
    #[error("response contained no results")]
    Empty,
}

impl From<FetchError> for TaskError {
    fn from(err: FetchError) -> Self {
        TaskError::Fetch(err.to_string())
    }
}

/// Supplies one raw user per call.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch(&self) -> Result<RawUser, FetchError>;
}

/// Fetches users from a randomuser-compatible HTTP endpoint.
pub struct HttpRecordSource {
    client: reqwest::Client,
    url: String,
}

impl HttpRecordSource {
    pub fn new(config: &SourceConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// Extract the first user from a `{"results": [...]}` body.
    pub fn first_result(body: Value) -> Result<RawUser, FetchError> {
        let first = match body {
            Value::Object(mut map) => match map.remove("results") {
                Some(Value::Array(results)) => results.into_iter().next(),
                Some(_) => {
                    return Err(FetchError::Malformed("`results` is not an array".into()));
                }
                None => None,
            },
            _ => return Err(FetchError::Malformed("body is not an object".into())),
        };

        let first = first.ok_or(FetchError::Empty)?;
        serde_json::from_value(first).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch(&self) -> Result<RawUser, FetchError> {
        debug!(url = %self.url, "fetching record");

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        Self::first_result(body)
    }
}
