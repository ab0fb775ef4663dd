//! Testing utilities for pipelines built on userflow.
//!
//! - [`MockTaskContext`]: Provides inputs to a single task and collects its outputs
//! - [`TestHarness`]: Runs DAGs against an in-memory store
//! - [`FailingTask`]: A task helper that fails N times then succeeds
//! - [`StaticSource`], [`RecordingPublisher`], [`FlakyPublisher`]: stand-ins
//!   for the record source and the broker

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

use crate::core::context::{ContextStore, TaskContext};
use crate::core::dag::Dag;
use crate::core::retry::RetryPolicy;
use crate::core::task::{Task, TaskError};
use crate::core::types::TaskId;
use crate::execution::{DagExecutor, DagResult};
use crate::pipeline::publisher::{PublishError, Publisher};
use crate::pipeline::record::RawUser;
use crate::pipeline::source::{FetchError, RecordSource};

/// A randomuser-style user with fixed contact details.
///
/// Email `a.b@x.com`, username `ab12`, phone `555-0100`.
pub fn sample_user_json(gender: &str) -> Value {
    json!({
        "gender": gender,
        "name": {"title": "Mx", "first": "Alex", "last": "Baker"},
        "location": {
            "street": {"number": 12, "name": "Elm Road"},
            "city": "Leeds",
            "state": "West Yorkshire",
            "country": "United Kingdom",
            "postcode": "LS1 4AP"
        },
        "email": "a.b@x.com",
        "login": {"uuid": "6f1c", "username": "ab12"},
        "dob": {"date": "1988-03-14T09:00:00.000Z", "age": 36},
        "registered": {"date": "2012-07-01T12:00:00.000Z", "age": 12},
        "phone": "555-0100",
        "cell": "555-0199",
        "picture": {"medium": "https://randomuser.me/api/portraits/med/1.jpg"},
        "nat": "GB"
    })
}

/// [`sample_user_json`] as a parsed [`RawUser`].
pub fn sample_user(gender: &str) -> RawUser {
    serde_json::from_value(sample_user_json(gender)).expect("sample user is well-formed")
}

/// A mock task context for exercising one task in isolation.
///
/// # Example
///
/// ```
/// use userflow::testing::MockTaskContext;
///
/// let mock = MockTaskContext::new("format_data");
/// mock.set_input("get_data.record", 42);
///
/// let ctx = mock.as_context();
/// let input: i32 = ctx.inputs.get("get_data.record").unwrap();
/// assert_eq!(input, 42);
/// ```
pub struct MockTaskContext {
    task_id: TaskId,
    store: ContextStore,
}

impl MockTaskContext {
    /// Create a new mock context for a task.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: TaskId::new(task_id),
            store: ContextStore::new(),
        }
    }

    /// Set an input value under its full key (e.g. `"get_data.record"`).
    pub fn set_input<T: serde::Serialize>(&self, key: impl Into<String>, value: T) {
        let value = serde_json::to_value(value).expect("failed to serialize input value");
        self.store
            .set_raw(key, value)
            .expect("failed to store input value");
    }

    /// Check whether a key is present in the store.
    pub fn has_key(&self, key: &str) -> bool {
        self.store.contains(key)
    }

    /// Merge the outputs a task wrote into the store, as the executor does
    /// after a successful attempt.
    pub fn commit(&self, ctx: &TaskContext) {
        self.store
            .merge(&ctx.outputs)
            .expect("failed to merge outputs");
    }

    /// Read a committed value.
    pub fn get_output<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.store.get_optional(key)
    }

    /// Build a context reading from a snapshot of the current store.
    pub fn as_context(&self) -> TaskContext {
        let inputs = self.store.snapshot().expect("context lock poisoned");
        TaskContext::new(inputs, self.task_id.clone())
    }
}

/// A task that fails a configurable number of times before succeeding.
///
/// On success it writes `"{name}.success" = true`.
pub struct FailingTask {
    name: String,
    state: AsyncMutex<FailingTaskState>,
    total_failures: u32,
    error_message: String,
    retry_policy: RetryPolicy,
}

struct FailingTaskState {
    failures_remaining: u32,
    call_count: u32,
}

impl FailingTask {
    /// Create a task that fails `fail_count` times then succeeds.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self::with_error(name, fail_count, "intentional test failure")
    }

    /// Create a task that fails with a custom error message.
    pub fn with_error(
        name: impl Into<String>,
        fail_count: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            state: AsyncMutex::new(FailingTaskState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            total_failures: fail_count,
            error_message: message.into(),
            retry_policy: RetryPolicy::none(),
        }
    }

    /// A task that never succeeds.
    pub fn always(name: impl Into<String>) -> Self {
        Self::new(name, u32::MAX)
    }

    /// Set a retry policy for this task.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Get the number of times this task has been called.
    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }

    /// Reset the failure counter for reuse.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.failures_remaining = self.total_failures;
        state.call_count = 0;
    }
}

#[async_trait]
impl Task for FailingTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            Err(TaskError::ExecutionFailed(self.error_message.clone()))
        } else {
            ctx.outputs.set("success", true)?;
            Ok(())
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }
}

/// Record source returning the same user on every call.
pub struct StaticSource {
    user: RawUser,
    failures: AtomicU32,
    calls: AtomicU32,
}

impl StaticSource {
    pub fn new(user: RawUser) -> Self {
        Self {
            user,
            failures: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    /// Source of [`sample_user`] with the given gender.
    pub fn sample(gender: &str) -> Self {
        Self::new(sample_user(gender))
    }

    /// Fail the first `failures` fetches.
    pub fn failing_first(self, failures: u32) -> Self {
        self.failures.store(failures, Ordering::SeqCst);
        self
    }

    /// The user this source hands out.
    pub fn user(&self) -> RawUser {
        self.user.clone()
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for StaticSource {
    async fn fetch(&self) -> Result<RawUser, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(FetchError::Status(503));
        }
        Ok(self.user.clone())
    }
}

/// Publisher keeping every message in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(topic, payload)` pairs in publish order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Payloads parsed as JSON.
    pub fn records(&self) -> Vec<Value> {
        self.published()
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if let Ok(mut published) = self.published.lock() {
            published.push((topic.to_string(), payload.to_vec()));
        }
        Ok(())
    }
}

/// Publisher rejecting the first N messages, then recording the rest.
pub struct FlakyPublisher {
    failures: AtomicU32,
    attempts: AtomicU32,
    inner: RecordingPublisher,
}

impl FlakyPublisher {
    pub fn new(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
            inner: RecordingPublisher::new(),
        }
    }

    /// Number of publish calls, successful or not.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Messages that went through.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.inner.published()
    }
}

#[async_trait]
impl Publisher for FlakyPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let rejected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(PublishError::Rejected {
                status: 503,
                body: "broker unavailable".to_string(),
            });
        }
        self.inner.publish(topic, payload).await
    }
}

/// Runs DAGs against an in-memory store.
///
/// # Example
///
/// ```ignore
/// use userflow::testing::TestHarness;
///
/// let harness = TestHarness::new().with_concurrency(2);
/// let result = harness.execute(&dag).await;
/// assert!(result.dag_result.success);
/// ```
pub struct TestHarness {
    executor: DagExecutor,
    initial_context: HashMap<String, Value>,
}

/// Result from TestHarness execution.
pub struct TestResult {
    /// The DAG execution result.
    pub dag_result: DagResult,
    /// The store after execution.
    pub context: HashMap<String, Value>,
}

impl TestResult {
    /// Deserialize a value from the final store.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.context
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

impl TestHarness {
    /// Create a new test harness.
    pub fn new() -> Self {
        Self {
            executor: DagExecutor::with_concurrency(4),
            initial_context: HashMap::new(),
        }
    }

    /// Set the concurrency limit for task execution.
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.executor = DagExecutor::with_concurrency(max_concurrency);
        self
    }

    /// Seed the store with a value visible to every task.
    pub fn with_context<T: serde::Serialize>(mut self, key: impl Into<String>, value: T) -> Self {
        let json_value = serde_json::to_value(value).expect("failed to serialize context value");
        self.initial_context.insert(key.into(), json_value);
        self
    }

    /// The executor driving the runs.
    pub fn executor(&self) -> &DagExecutor {
        &self.executor
    }

    /// Execute a DAG and return the result.
    pub async fn execute(&self, dag: &Dag) -> TestResult {
        let store = ContextStore::from_map(self.initial_context.clone());
        let mut ctx = TaskContext::new(store.clone(), TaskId::new("harness"));

        let dag_result = self.executor.execute(dag, &mut ctx).await;

        TestResult {
            dag_result,
            context: store.to_map(),
        }
    }

    /// Execute and assert success.
    pub async fn execute_and_assert_success(&self, dag: &Dag) -> TestResult {
        let result = self.execute(dag).await;
        assert!(
            result.dag_result.success,
            "expected the run to succeed:\n{}",
            result.dag_result.failure_summary().unwrap_or_default()
        );
        result
    }

    /// Execute and assert failure.
    pub async fn execute_and_assert_failure(&self, dag: &Dag) -> TestResult {
        let result = self.execute(dag).await;
        assert!(
            !result.dag_result.success,
            "expected the run to fail, but it succeeded"
        );
        result
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
