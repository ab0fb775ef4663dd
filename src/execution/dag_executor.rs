//! DAG execution engine.
//!
//! The `DagExecutor` orchestrates one run of a DAG. Ready tasks are
//! dispatched as soon as their upstreams are resolved; every completion
//! updates the execution records, which may release further tasks or skip
//! whole paths. Retries and pacing happen inside each task's own future,
//! so a waiting task never holds up an unrelated one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::core::context::{ContextStore, OutputBuffer, TaskContext};
use crate::core::dag::Dag;
use crate::core::state::{ExecutionState, RunOutcome, RunPhase, TaskStatus};
use crate::core::task::TaskError;
use crate::core::types::{DagId, RunId, TaskId};
use crate::events::{Event, EventBus};

use super::executor::{AttemptObserver, TaskExecutor, TaskResult};

/// Result of executing a DAG.
#[derive(Debug, Clone)]
pub struct DagResult {
    /// Identifier of this run.
    pub run_id: RunId,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Whether the run reached `Success`.
    pub success: bool,
    /// Outcome derived from the end task.
    pub outcome: RunOutcome,
    /// Total duration of DAG execution.
    pub duration: Duration,
    /// Results for each task that was dispatched.
    pub task_results: HashMap<TaskId, TaskResult>,
    /// Final status of each task.
    pub task_statuses: HashMap<TaskId, TaskStatus>,
    /// Tasks that failed, in declaration order.
    pub failed_tasks: Vec<TaskId>,
    /// Tasks that were skipped, in declaration order.
    pub skipped_tasks: Vec<TaskId>,
}

impl DagResult {
    /// Get the number of succeeded tasks.
    pub fn completed_count(&self) -> usize {
        self.task_statuses
            .values()
            .filter(|s| **s == TaskStatus::Succeeded)
            .count()
    }

    /// Get the number of failed tasks.
    pub fn failed_count(&self) -> usize {
        self.failed_tasks.len()
    }

    /// Get the number of skipped tasks.
    pub fn skipped_count(&self) -> usize {
        self.skipped_tasks.len()
    }

    /// Get the result for a specific task.
    pub fn get_task_result(&self, task_id: &TaskId) -> Option<&TaskResult> {
        self.task_results.get(task_id)
    }

    /// Get the final status of a task.
    pub fn status(&self, task_id: &str) -> Option<&TaskStatus> {
        self.task_statuses.get(&TaskId::new(task_id))
    }

    /// One line per failed task with its attempt count and last error.
    ///
    /// `None` when nothing failed.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failed_tasks.is_empty() {
            return None;
        }

        let lines: Vec<String> = self
            .failed_tasks
            .iter()
            .map(|id| match self.task_results.get(id) {
                Some(result) => format!(
                    "task '{}' failed after {} attempt(s): {}",
                    id,
                    result.attempts,
                    result.error.as_deref().unwrap_or("unknown error")
                ),
                None => format!("task '{}' failed", id),
            })
            .collect();
        Some(lines.join("\n"))
    }
}

/// Keeps the execution records and event stream current while a task's
/// attempts are in progress.
struct RunObserver {
    dag_id: DagId,
    state: Arc<RwLock<ExecutionState>>,
    event_bus: Option<Arc<EventBus>>,
}

#[async_trait]
impl AttemptObserver for RunObserver {
    async fn on_attempt(&self, task_id: &TaskId, attempt: u32) {
        if attempt == 1 {
            return;
        }
        if let Err(err) = self.state.write().await.mark_running(task_id) {
            error!(task = %task_id, error = %err, "failed to record retry attempt");
        }
    }

    async fn on_retry_scheduled(
        &self,
        task_id: &TaskId,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        _error: &TaskError,
    ) {
        if let Err(err) = self
            .state
            .write()
            .await
            .mark_retry_scheduled(task_id, attempt, delay)
        {
            error!(task = %task_id, error = %err, "failed to record scheduled retry");
        }

        if let Some(bus) = &self.event_bus {
            bus.emit(Event::task_retrying(
                task_id.clone(),
                self.dag_id.clone(),
                attempt,
                max_attempts,
                delay,
            ))
            .await;
        }
    }
}

/// Executor for running DAGs with dependency management.
pub struct DagExecutor {
    /// Underlying task executor.
    task_executor: Arc<TaskExecutor>,
    /// Phase of the most recent run.
    phase: RwLock<RunPhase>,
}

impl DagExecutor {
    /// Create a new DAG executor with the given task executor.
    pub fn new(task_executor: TaskExecutor) -> Self {
        Self {
            task_executor: Arc::new(task_executor),
            phase: RwLock::new(RunPhase::NotStarted),
        }
    }

    /// Create a new DAG executor bounding concurrent attempts.
    pub fn with_concurrency(max_concurrency: usize) -> Self {
        Self::new(TaskExecutor::new(max_concurrency))
    }

    /// Phase of the most recent run.
    pub async fn phase(&self) -> RunPhase {
        *self.phase.read().await
    }

    /// Execute a DAG, respecting dependencies, conditions and branches.
    ///
    /// `ctx.inputs` is the run's shared store: it seeds every task's input
    /// and receives each successful task's outputs.
    pub async fn execute(&self, dag: &Dag, ctx: &mut TaskContext) -> DagResult {
        self.execute_with_events(dag, ctx, None).await
    }

    /// Execute a DAG with optional event emission.
    pub async fn execute_with_events(
        &self,
        dag: &Dag,
        ctx: &mut TaskContext,
        event_bus: Option<Arc<EventBus>>,
    ) -> DagResult {
        let run_id = RunId::new();
        let span = info_span!(
            "dag_execution",
            dag = %dag.id(),
            run = %run_id,
            task_count = dag.len(),
        );

        self.run(dag, ctx, run_id, event_bus).instrument(span).await
    }

    async fn run(
        &self,
        dag: &Dag,
        ctx: &mut TaskContext,
        run_id: RunId,
        event_bus: Option<Arc<EventBus>>,
    ) -> DagResult {
        let dag_id = dag.id().clone();
        let started_at = Utc::now();
        let start_time = Instant::now();

        *self.phase.write().await = RunPhase::Running;
        debug!(dag = %dag_id, task_count = dag.len(), "starting DAG execution");

        if let Some(bus) = &event_bus {
            bus.emit(Event::run_started(dag_id.clone(), run_id)).await;
        }

        let state = Arc::new(RwLock::new(ExecutionState::new(dag)));
        let mut results: HashMap<TaskId, TaskResult> = HashMap::new();
        let shared_store = ctx.inputs.clone();
        let mut in_flight = FuturesUnordered::new();

        loop {
            let ready = state.read().await.ready_tasks(dag);
            if !ready.is_empty() {
                debug!(dag = %dag_id, ready_count = ready.len(), "dispatching ready tasks");
            }

            for task_id in ready {
                let Some(node) = dag.get_task(&task_id).cloned() else {
                    continue;
                };

                if let Err(err) = state.write().await.mark_running(&task_id) {
                    error!(task = %task_id, error = %err, "failed to mark task running");
                    continue;
                }

                if let Some(bus) = &event_bus {
                    bus.emit(Event::task_started(task_id.clone(), dag_id.clone()))
                        .await;
                }

                let input = match shared_store.snapshot() {
                    Ok(input) => input,
                    Err(err) => {
                        let result =
                            TaskResult::failure(task_id.clone(), 0, Duration::ZERO, err.to_string());
                        self.record_completion(
                            dag,
                            &state,
                            &shared_store,
                            &event_bus,
                            result,
                            OutputBuffer::new(task_id.clone()),
                            &mut results,
                        )
                        .await;
                        continue;
                    }
                };

                let mut task_ctx = TaskContext::new(input, task_id.clone());
                let executor = Arc::clone(&self.task_executor);
                let observer = RunObserver {
                    dag_id: dag_id.clone(),
                    state: Arc::clone(&state),
                    event_bus: event_bus.clone(),
                };
                let task_span = info_span!(
                    "dag_task_dispatch",
                    dag = %dag_id,
                    task = %task_id,
                );

                let handle = tokio::spawn(
                    async move {
                        let result = executor
                            .execute_observed(&node, &mut task_ctx, &observer)
                            .await;
                        (result, task_ctx.outputs)
                    }
                    .instrument(task_span),
                );
                in_flight.push(async move { (task_id, handle.await) });
            }

            // Wait for the next task to finish, whichever it is
            let Some((task_id, joined)) = in_flight.next().await else {
                break;
            };

            let (result, outputs) = match joined {
                Ok(finished) => finished,
                Err(err) => (
                    TaskResult::failure(
                        task_id.clone(),
                        1,
                        Duration::ZERO,
                        format!("task aborted: {}", err),
                    ),
                    OutputBuffer::new(task_id.clone()),
                ),
            };

            self.record_completion(
                dag,
                &state,
                &shared_store,
                &event_bus,
                result,
                outputs,
                &mut results,
            )
            .await;
        }

        let state = state.read().await;
        if !state.is_finished() {
            warn!(dag = %dag_id, "run ended with unresolved tasks");
        }

        let outcome = state.outcome(dag);
        let success = outcome == RunOutcome::Success;
        let failed_tasks = state.tasks_with_status(dag, &TaskStatus::Failed);
        let skipped_tasks = state.tasks_with_status(dag, &TaskStatus::Skipped);
        let duration = start_time.elapsed();

        debug!(
            dag = %dag_id,
            outcome = %outcome,
            duration_ms = %duration.as_millis(),
            completed = results.values().filter(|r| r.success).count(),
            failed = failed_tasks.len(),
            skipped = skipped_tasks.len(),
            "DAG execution completed"
        );

        *self.phase.write().await = RunPhase::Completed(outcome);

        if let Some(bus) = &event_bus {
            bus.emit(Event::run_completed(dag_id, run_id, success, duration))
                .await;
        }

        DagResult {
            run_id,
            started_at,
            success,
            outcome,
            duration,
            task_results: results,
            task_statuses: state.statuses().clone(),
            failed_tasks,
            skipped_tasks,
        }
    }

    /// Turn a finished task into a terminal record.
    ///
    /// On success the outputs are merged into the shared store before the
    /// record changes, so released dependents always see them.
    #[allow(clippy::too_many_arguments)]
    async fn record_completion(
        &self,
        dag: &Dag,
        state: &Arc<RwLock<ExecutionState>>,
        shared_store: &ContextStore,
        event_bus: &Option<Arc<EventBus>>,
        result: TaskResult,
        outputs: OutputBuffer,
        results: &mut HashMap<TaskId, TaskResult>,
    ) {
        let task_id = result.task_id.clone();
        let dag_id = dag.id().clone();

        let result = if result.success {
            match shared_store.merge(&outputs) {
                Ok(()) => result,
                Err(err) => TaskResult::failure(
                    task_id.clone(),
                    result.attempts,
                    result.duration,
                    err.to_string(),
                ),
            }
        } else {
            result
        };

        let mut events = Vec::new();
        let marked = {
            let mut state = state.write().await;
            match (&result.selected, result.success) {
                (Some(selected), true) => {
                    debug!(branch = %task_id, selected = %selected, "branch resolved");
                    events.push(Event::task_completed(
                        task_id.clone(),
                        dag_id.clone(),
                        result.duration,
                    ));
                    events.push(Event::branch_selected(
                        task_id.clone(),
                        dag_id.clone(),
                        selected.clone(),
                    ));
                    state.resolve_branch(dag, &task_id, selected)
                }
                (None, true) => {
                    events.push(Event::task_completed(
                        task_id.clone(),
                        dag_id.clone(),
                        result.duration,
                    ));
                    state.mark_terminal(dag, &task_id, TaskStatus::Succeeded)
                }
                (_, false) => {
                    events.push(Event::task_failed(
                        task_id.clone(),
                        dag_id.clone(),
                        result
                            .error
                            .clone()
                            .unwrap_or_else(|| "unknown error".to_string()),
                        result.attempts,
                    ));
                    state.mark_terminal(dag, &task_id, TaskStatus::Failed)
                }
            }
        };

        match marked {
            Ok(skipped) => {
                for skipped_id in skipped {
                    debug!(task = %skipped_id, "task skipped");
                    events.push(Event::task_skipped(skipped_id, dag_id.clone()));
                }
            }
            Err(err) => error!(task = %task_id, error = %err, "failed to record task completion"),
        }

        if let Some(bus) = event_bus {
            for event in events {
                bus.emit(event).await;
            }
        }

        results.insert(task_id, result);
    }
}

impl Default for DagExecutor {
    fn default() -> Self {
        Self::with_concurrency(4)
    }
}
