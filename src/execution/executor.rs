//! Task execution engine.
//!
//! The `TaskExecutor` runs a single graph node to a terminal result with:
//! - Retry logic based on the node's retry policy
//! - Concurrency limiting via semaphore, held for one attempt at a time
//! - Pacing for tasks that declare a minimum duration
//! - Branch resolution against the declared successor set

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::core::context::TaskContext;
use crate::core::dag::{NodeKind, TaskNode};
use crate::core::retry::RetryDecision;
use crate::core::task::TaskError;
use crate::core::types::TaskId;

/// Result of executing a task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    /// The task that was executed.
    pub task_id: TaskId,
    /// Whether the task succeeded.
    pub success: bool,
    /// Number of attempts made (1 = first try, 2+ = retries).
    pub attempts: u32,
    /// Total duration of all attempts, retry delays and pacing included.
    pub duration: Duration,
    /// Error of the last attempt if the task failed.
    pub error: Option<String>,
    /// Successor selected by a branch node.
    pub selected: Option<TaskId>,
}

impl TaskResult {
    /// Create a successful result.
    pub fn success(task_id: TaskId, attempts: u32, duration: Duration) -> Self {
        Self {
            task_id,
            success: true,
            attempts,
            duration,
            error: None,
            selected: None,
        }
    }

    /// Create a failed result.
    pub fn failure(task_id: TaskId, attempts: u32, duration: Duration, error: String) -> Self {
        Self {
            task_id,
            success: false,
            attempts,
            duration,
            error: Some(error),
            selected: None,
        }
    }

    /// Attach a branch selection.
    pub fn with_selection(mut self, selected: Option<TaskId>) -> Self {
        self.selected = selected;
        self
    }
}

/// Hooks into the attempt loop, used by the scheduler to keep execution
/// records and events current while a node retries.
#[async_trait]
pub trait AttemptObserver: Send + Sync {
    /// Called before each attempt (1-indexed).
    async fn on_attempt(&self, _task_id: &TaskId, _attempt: u32) {}

    /// Called after a failed attempt when another one is scheduled.
    async fn on_retry_scheduled(
        &self,
        _task_id: &TaskId,
        _attempt: u32,
        _max_attempts: u32,
        _delay: Duration,
        _error: &TaskError,
    ) {
    }
}

/// Observer that ignores every notification.
pub struct NoopObserver;

impl AttemptObserver for NoopObserver {}

/// Executor for running tasks with concurrency control and retry logic.
pub struct TaskExecutor {
    /// Maximum number of concurrent attempts.
    max_concurrency: usize,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
}

impl TaskExecutor {
    /// Create a new executor with the given concurrency limit.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// Get the maximum concurrency limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Get the number of available permits (slots for concurrent attempts).
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Execute a node with retry logic.
    pub async fn execute(&self, node: &TaskNode, ctx: &mut TaskContext) -> TaskResult {
        self.execute_observed(node, ctx, &NoopObserver).await
    }

    /// Execute a node with retry logic, reporting progress to `observer`.
    ///
    /// This method will:
    /// 1. Acquire a concurrency permit and run one attempt
    /// 2. On failure, consult the retry policy; outputs of the failed
    ///    attempt are discarded and the next attempt starts after the delay
    /// 3. On success, pause for the rest of the task's minimum duration
    /// 4. Return the result with attempt count and duration
    pub async fn execute_observed(
        &self,
        node: &TaskNode,
        ctx: &mut TaskContext,
        observer: &dyn AttemptObserver,
    ) -> TaskResult {
        let task_id = node.id.clone();
        let start_time = Instant::now();
        let retry_policy = node.retry_policy();

        let mut attempts = 0u32;

        loop {
            attempts += 1;
            observer.on_attempt(&task_id, attempts).await;

            let attempt_start = Instant::now();
            match self.attempt(node, ctx).await {
                Ok(selected) => {
                    if let Some(min_duration) = node.min_duration() {
                        let elapsed = attempt_start.elapsed();
                        if elapsed < min_duration {
                            let remaining = min_duration - elapsed;
                            debug!(task = %task_id, ?remaining, "pacing before completion");
                            sleep(remaining).await;
                        }
                    }
                    return TaskResult::success(task_id, attempts, start_time.elapsed())
                        .with_selection(selected);
                }
                Err(err) => match retry_policy.decide(attempts, &err) {
                    RetryDecision::Retry(delay) => {
                        ctx.outputs.clear();
                        warn!(
                            task = %task_id,
                            attempt = attempts,
                            max_attempts = retry_policy.max_attempts,
                            ?delay,
                            error = %err,
                            "attempt failed, retrying"
                        );
                        observer
                            .on_retry_scheduled(
                                &task_id,
                                attempts,
                                retry_policy.max_attempts,
                                delay,
                                &err,
                            )
                            .await;
                        sleep(delay).await;
                    }
                    RetryDecision::GiveUp => {
                        return TaskResult::failure(
                            task_id,
                            attempts,
                            start_time.elapsed(),
                            err.to_string(),
                        );
                    }
                },
            }
        }
    }

    /// Run one attempt while holding a permit.
    ///
    /// Branch nodes return their resolved successor.
    async fn attempt(
        &self,
        node: &TaskNode,
        ctx: &mut TaskContext,
    ) -> Result<Option<TaskId>, TaskError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| TaskError::ExecutionFailed("executor is shut down".to_string()))?;

        match &node.kind {
            NodeKind::Task(task) => task.execute(ctx).await.map(|()| None),
            NodeKind::Branch(branch) => {
                let choice = branch.task.choose(ctx).await?;
                let selected = branch.resolve(&choice);
                if selected != choice {
                    warn!(
                        branch = %node.id,
                        choice = %choice,
                        fallback = %selected,
                        "choice is not a declared successor, using fallback"
                    );
                }
                Ok(Some(selected))
            }
        }
    }
}

impl Default for TaskExecutor {
    fn default() -> Self {
        Self::new(4)
    }
}
