//! Task traits and error types.
//!
//! [`Task`] is the fundamental unit of work in the engine. [`BranchTask`]
//! is the variant whose result is not a value but the name of the one
//! successor that should run next.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::context::TaskContext;
use super::retry::RetryPolicy;
use super::types::TaskId;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The upstream record source was unreachable or returned garbage.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The broker was unreachable, timed out, or rejected the record.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Task timed out.
    #[error("task timed out after {0:?}")]
    Timeout(Duration),

    /// Error accessing task context.
    #[error("context error: {0}")]
    Context(#[from] super::context::ContextError),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The core trait for defining executable tasks.
///
/// # Example
///
/// ```ignore
/// use userflow::{Task, TaskContext, TaskError};
/// use async_trait::async_trait;
///
/// struct Double;
///
/// #[async_trait]
/// impl Task for Double {
///     fn name(&self) -> &str {
///         "double"
///     }
///
///     async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
///         let input: i32 = ctx.inputs.get("upstream.value")?;
///         ctx.outputs.set("value", input * 2)?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync {
    /// Returns the unique name of this task within its DAG.
    fn name(&self) -> &str;

    /// Execute the task with the given context.
    ///
    /// A retry re-runs this whole body, side effects included.
    async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError>;

    /// Returns the retry policy for this task.
    ///
    /// Default implementation returns no retries.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Minimum wall-clock time a successful attempt occupies.
    ///
    /// When set, the executor pauses the task's own line of execution for
    /// the remainder before reporting success.
    fn min_duration(&self) -> Option<Duration> {
        None
    }

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

/// A task that selects which of its declared successors runs.
///
/// The returned name is checked against the successor set declared on the
/// graph; anything outside it resolves to the fallback successor.
#[async_trait]
pub trait BranchTask: Send + Sync {
    /// Returns the unique name of this branch within its DAG.
    fn name(&self) -> &str;

    /// Pick the successor to activate.
    async fn choose(&self, ctx: &mut TaskContext) -> Result<TaskId, TaskError>;

    /// Returns the retry policy for this branch.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::ContextStore;

    fn create_test_context(task_name: &str) -> TaskContext {
        TaskContext::new(ContextStore::new(), TaskId::new(task_name))
    }

    struct SuccessTask {
        name: String,
    }

    #[async_trait]
    impl Task for SuccessTask {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, ctx: &mut TaskContext) -> Result<(), TaskError> {
            ctx.outputs.set("status", "completed")?;
            Ok(())
        }
    }

    struct RetryableTask;

    #[async_trait]
    impl Task for RetryableTask {
        fn name(&self) -> &str {
            "retryable"
        }

        async fn execute(&self, _ctx: &mut TaskContext) -> Result<(), TaskError> {
            Ok(())
        }

        fn retry_policy(&self) -> RetryPolicy {
            RetryPolicy::fixed(2, Duration::from_secs(60))
        }

        fn min_duration(&self) -> Option<Duration> {
            Some(Duration::from_secs(60))
        }
    }

    struct PickFirst;

    #[async_trait]
    impl BranchTask for PickFirst {
        fn name(&self) -> &str {
            "pick"
        }

        async fn choose(&self, _ctx: &mut TaskContext) -> Result<TaskId, TaskError> {
            Ok(TaskId::new("first"))
        }
    }

    #[tokio::test]
    async fn test_task_writes_output() {
        let task = SuccessTask {
            name: "writer".to_string(),
        };
        let mut ctx = create_test_context("writer");

        task.execute(&mut ctx).await.unwrap();

        assert_eq!(
            ctx.outputs.get_raw("writer.status"),
            Some(serde_json::json!("completed"))
        );
    }

    #[tokio::test]
    async fn test_task_defaults() {
        let task = SuccessTask {
            name: "simple".to_string(),
        };

        assert_eq!(task.retry_policy(), RetryPolicy::none());
        assert!(task.min_duration().is_none());
        assert!(task.description().is_none());
    }

    #[tokio::test]
    async fn test_custom_policies() {
        let task = RetryableTask;

        assert_eq!(task.retry_policy().max_attempts, 2);
        assert_eq!(task.min_duration(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_branch_task_returns_selector() {
        let mut ctx = create_test_context("pick");

        let choice = PickFirst.choose(&mut ctx).await.unwrap();

        assert_eq!(choice.as_str(), "first");
        assert_eq!(PickFirst.retry_policy().max_attempts, 1);
    }

    #[test]
    fn test_task_error_display() {
        let err = TaskError::ExecutionFailed("test error".to_string());
        assert_eq!(err.to_string(), "execution failed: test error");

        let err = TaskError::Publish("broker down".to_string());
        assert_eq!(err.to_string(), "publish failed: broker down");

        let err = TaskError::Fetch("503".to_string());
        assert_eq!(err.to_string(), "fetch failed: 503");
    }
}
