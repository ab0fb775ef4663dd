//! Per-run execution records.
//!
//! [`ExecutionState`] holds one [`TaskStatus`] per node of a [`Dag`] for the
//! duration of a single run. It answers readiness questions and performs
//! skip propagation; only the scheduler mutates it.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::dag::{Dag, Readiness};
use super::types::TaskId;

/// Runtime state of a single task within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet evaluated as ready.
    Pending,
    /// An attempt is in progress.
    Running,
    /// An attempt failed; the next one starts after `delay`.
    RetryScheduled { attempt: u32, delay: Duration },
    /// Finished successfully.
    Succeeded,
    /// Will not run in this execution.
    Skipped,
    /// Failed after exhausting its retry policy.
    Failed,
}

impl TaskStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Skipped | TaskStatus::Failed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running | TaskStatus::RetryScheduled { .. } => 1,
            TaskStatus::Succeeded | TaskStatus::Skipped | TaskStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the record moving forward.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        let (from, to) = (self.rank(), next.rank());
        to > from || (from == 1 && to == 1)
    }

    /// Short lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::RetryScheduled { .. } => "retry_scheduled",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::RetryScheduled { attempt, delay } => {
                write!(f, "retry_scheduled(attempt {}, in {:?})", attempt, delay)
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Errors raised by illegal updates to the execution records.
#[derive(Debug, Error)]
pub enum StateError {
    /// The task is not part of this run.
    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    /// The requested move would go backwards or out of a terminal state.
    #[error("invalid transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The task is not a branch.
    #[error("task '{0}' is not a branch")]
    NotABranch(TaskId),

    /// A branch was resolved to something outside its successor set.
    #[error("branch '{branch}' has no successor '{selected}'")]
    UndeclaredSuccessor { branch: TaskId, selected: TaskId },
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The end task succeeded.
    Success,
    /// The end task was skipped or failed.
    Failure,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => f.write_str("success"),
            RunOutcome::Failure => f.write_str("failure"),
        }
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Running,
    Completed(RunOutcome),
}

/// Execution records for every task of a DAG during one run.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    statuses: HashMap<TaskId, TaskStatus>,
}

impl ExecutionState {
    /// Fresh records, every task `Pending`.
    pub fn new(dag: &Dag) -> Self {
        Self {
            statuses: dag
                .task_ids()
                .into_iter()
                .map(|id| (id, TaskStatus::Pending))
                .collect(),
        }
    }

    /// Current status of a task.
    pub fn status(&self, id: &TaskId) -> Option<&TaskStatus> {
        self.statuses.get(id)
    }

    /// All records.
    pub fn statuses(&self) -> &HashMap<TaskId, TaskStatus> {
        &self.statuses
    }

    /// Move a task to `to`, rejecting backward transitions.
    pub fn transition(&mut self, id: &TaskId, to: TaskStatus) -> Result<(), StateError> {
        let current = self
            .statuses
            .get_mut(id)
            .ok_or_else(|| StateError::UnknownTask(id.clone()))?;

        if !current.can_transition_to(&to) {
            return Err(StateError::InvalidTransition {
                task: id.clone(),
                from: current.clone(),
                to,
            });
        }

        *current = to;
        Ok(())
    }

    pub fn mark_running(&mut self, id: &TaskId) -> Result<(), StateError> {
        self.transition(id, TaskStatus::Running)
    }

    pub fn mark_retry_scheduled(
        &mut self,
        id: &TaskId,
        attempt: u32,
        delay: Duration,
    ) -> Result<(), StateError> {
        self.transition(id, TaskStatus::RetryScheduled { attempt, delay })
    }

    /// Record a terminal status and re-evaluate downstream tasks.
    ///
    /// Returns the tasks newly marked `Skipped` as a consequence, in the
    /// order they were reached.
    pub fn mark_terminal(
        &mut self,
        dag: &Dag,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Vec<TaskId>, StateError> {
        if !status.is_terminal() {
            let from = self
                .status(id)
                .cloned()
                .ok_or_else(|| StateError::UnknownTask(id.clone()))?;
            return Err(StateError::InvalidTransition {
                task: id.clone(),
                from,
                to: status,
            });
        }

        self.transition(id, status)?;
        self.propagate(dag, [id.clone()])
    }

    /// Record a branch's selection.
    ///
    /// Every declared successor other than `selected` is skipped (with
    /// propagation), then the branch itself is marked `Succeeded`.
    pub fn resolve_branch(
        &mut self,
        dag: &Dag,
        id: &TaskId,
        selected: &TaskId,
    ) -> Result<Vec<TaskId>, StateError> {
        let branch = dag
            .get_branch(id)
            .ok_or_else(|| StateError::NotABranch(id.clone()))?;
        if !branch.declares(selected) {
            return Err(StateError::UndeclaredSuccessor {
                branch: id.clone(),
                selected: selected.clone(),
            });
        }

        let mut skipped = Vec::new();
        for successor in branch.successors.iter().filter(|s| *s != selected) {
            if self.status(successor) == Some(&TaskStatus::Pending) {
                self.transition(successor, TaskStatus::Skipped)?;
                skipped.push(successor.clone());
            }
        }

        self.transition(id, TaskStatus::Succeeded)?;

        let propagated = self.propagate(dag, skipped.clone())?;
        skipped.extend(propagated);
        Ok(skipped)
    }

    fn propagate(
        &mut self,
        dag: &Dag,
        sources: impl IntoIterator<Item = TaskId>,
    ) -> Result<Vec<TaskId>, StateError> {
        let mut skipped = Vec::new();
        let mut queue: VecDeque<TaskId> = sources.into_iter().collect();

        while let Some(id) = queue.pop_front() {
            for downstream in dag.get_downstream(&id) {
                if self.status(&downstream) != Some(&TaskStatus::Pending) {
                    continue;
                }
                if self.evaluate(dag, &downstream) == Readiness::Skip {
                    self.transition(&downstream, TaskStatus::Skipped)?;
                    skipped.push(downstream.clone());
                    queue.push_back(downstream);
                }
            }
        }

        Ok(skipped)
    }

    /// Evaluate a task's condition against its upstream records.
    pub fn evaluate(&self, dag: &Dag, id: &TaskId) -> Readiness {
        let Some(node) = dag.get_task(id) else {
            return Readiness::Waiting;
        };
        let upstream = dag
            .get_dependencies(id)
            .unwrap_or(&[])
            .iter()
            .filter_map(|dep| self.statuses.get(dep));
        node.condition.evaluate(upstream)
    }

    /// Pending tasks whose condition evaluates to ready, in declaration order.
    pub fn ready_tasks(&self, dag: &Dag) -> Vec<TaskId> {
        dag.task_ids()
            .into_iter()
            .filter(|id| self.status(id) == Some(&TaskStatus::Pending))
            .filter(|id| self.evaluate(dag, id) == Readiness::Ready)
            .collect()
    }

    /// Whether every task is terminal.
    pub fn is_finished(&self) -> bool {
        self.statuses.values().all(TaskStatus::is_terminal)
    }

    /// Tasks currently in `status`, in declaration order.
    pub fn tasks_with_status(&self, dag: &Dag, status: &TaskStatus) -> Vec<TaskId> {
        dag.task_ids()
            .into_iter()
            .filter(|id| self.status(id) == Some(status))
            .collect()
    }

    /// Outcome derived from the end task.
    pub fn outcome(&self, dag: &Dag) -> RunOutcome {
        match dag.end_task().and_then(|end| self.status(&end).cloned()) {
            Some(TaskStatus::Succeeded) => RunOutcome::Success,
            _ => RunOutcome::Failure,
        }
    }
}
