//! Tasks of the user registry pipeline.
//!
//! Every task passes its record downstream under `"{task}.record"`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::publisher::Publisher;
use super::record::{Enrichment, Gender, RawUser, UserRecord};
use super::source::RecordSource;
use super::{PROCESS_FEMALE, PROCESS_MALE, UNKNOWN_GENDER};
use crate::core::context::TaskContext;
use crate::core::retry::RetryPolicy;
use crate::core::task::{BranchTask, Task, TaskError};
use crate::core::types::TaskId;

/// Output key under which every task stores its record.
pub const RECORD_KEY: &str = "record";

/// Store key of the record produced by `task`.
pub fn record_key(task: &str) -> String {
    format!("{}.{}", task, RECORD_KEY)
}

/// Marker task with no work: graph start, end and the fallback path.
pub struct EmptyTask {
    name: String,
    retry_policy: RetryPolicy,
}

impl EmptyTask {
    pub fn new(name: impl Into<String>, retry_policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            retry_policy,
        }
    }
}

#[async_trait]
impl Task for EmptyTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &mut TaskContext) -> Result<(), TaskError> {
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }
}

/// Pulls one raw user from the source.
pub struct FetchRecordTask {
    name: String,
    source: Arc<dyn RecordSource>,
    retry_policy: RetryPolicy,
}

impl FetchRecordTask {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn RecordSource>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            retry_policy,
        }
    }
}

#[async_trait]
impl Task for FetchRecordTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let user = self.source.fetch().await?;
        ctx.outputs.set(RECORD_KEY, user)?;
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn description(&self) -> Option<&str> {
        Some("fetch one user from the record source")
    }
}

/// Normalizes the raw user into a flat record.
pub struct FormatRecordTask {
    name: String,
    upstream: String,
    retry_policy: RetryPolicy,
}

impl FormatRecordTask {
    pub fn new(
        name: impl Into<String>,
        upstream: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            upstream: upstream.into(),
            retry_policy,
        }
    }
}

#[async_trait]
impl Task for FormatRecordTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let raw: RawUser = ctx.inputs.get(&record_key(&self.upstream))?;
        ctx.outputs.set(RECORD_KEY, UserRecord::format(raw))?;
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn description(&self) -> Option<&str> {
        Some("flatten the raw user into the published record shape")
    }
}

/// Routes the record by its gender discriminant.
pub struct BranchByGender {
    name: String,
    upstream: String,
    retry_policy: RetryPolicy,
}

impl BranchByGender {
    pub fn new(
        name: impl Into<String>,
        upstream: impl Into<String>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            upstream: upstream.into(),
            retry_policy,
        }
    }

    /// Successor for a gender.
    pub fn route(gender: Gender) -> TaskId {
        match gender {
            Gender::Male => TaskId::new(PROCESS_MALE),
            Gender::Female => TaskId::new(PROCESS_FEMALE),
            Gender::Unknown => TaskId::new(UNKNOWN_GENDER),
        }
    }
}

#[async_trait]
impl BranchTask for BranchByGender {
    fn name(&self) -> &str {
        &self.name
    }

    async fn choose(&self, ctx: &mut TaskContext) -> Result<TaskId, TaskError> {
        // Read loosely: a missing or non-string gender still routes.
        let record: Value = ctx.inputs.get(&record_key(&self.upstream))?;
        let gender = Gender::from_discriminant(record.get("gender").and_then(Value::as_str));
        Ok(Self::route(gender))
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn description(&self) -> Option<&str> {
        Some("route by gender")
    }
}

/// Adds the gender path's business fields to the record.
pub struct ProcessGenderTask {
    name: String,
    upstream: String,
    enrichment: Enrichment,
    retry_policy: RetryPolicy,
}

impl ProcessGenderTask {
    pub fn new(
        name: impl Into<String>,
        upstream: impl Into<String>,
        enrichment: Enrichment,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            upstream: upstream.into(),
            enrichment,
            retry_policy,
        }
    }
}

#[async_trait]
impl Task for ProcessGenderTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let record: UserRecord = ctx.inputs.get(&record_key(&self.upstream))?;
        ctx.outputs
            .set(RECORD_KEY, record.enrich(&self.enrichment))?;
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }
}

/// Publishes the record, occupying at least `interval` when it succeeds.
pub struct StreamTask {
    name: String,
    upstream: String,
    publisher: Arc<dyn Publisher>,
    topic: String,
    interval: Duration,
    retry_policy: RetryPolicy,
}

impl StreamTask {
    pub fn new(
        name: impl Into<String>,
        upstream: impl Into<String>,
        publisher: Arc<dyn Publisher>,
        topic: impl Into<String>,
        interval: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            upstream: upstream.into(),
            publisher,
            topic: topic.into(),
            interval,
            retry_policy,
        }
    }
}

#[async_trait]
impl Task for StreamTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let record: UserRecord = ctx.inputs.get(&record_key(&self.upstream))?;
        let payload = record
            .to_payload()
            .map_err(|e| TaskError::Publish(e.to_string()))?;

        if let Err(err) = self.publisher.publish(&self.topic, &payload).await {
            error!(task = %self.name, topic = %self.topic, error = %err, "failed to publish record");
            return Err(err.into());
        }

        info!(username = %record.username, topic = %self.topic, "published record");
        ctx.outputs.set(RECORD_KEY, record)?;
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    fn min_duration(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }

    fn description(&self) -> Option<&str> {
        Some("publish the record to the topic")
    }
}
