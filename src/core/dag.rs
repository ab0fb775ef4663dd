//! Directed Acyclic Graph (DAG) for task dependencies.
//!
//! A DAG defines the execution order of tasks based on their dependencies.
//! Besides ordinary tasks it holds branch nodes, which activate exactly one
//! of their declared successors, and join nodes, which converge paths that
//! may have been skipped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::RetryPolicy;
use super::state::TaskStatus;
use super::task::{BranchTask, Task};
use super::types::{DagId, TaskId};

/// Errors that make a graph unusable. All of them surface at build time.
#[derive(Debug, Error)]
pub enum DagError {
    /// A cycle was detected in the graph.
    #[error("cycle detected involving task: {0}")]
    CycleDetected(TaskId),

    /// A dependency references a task that doesn't exist.
    #[error("missing dependency: task '{from}' depends on non-existent task '{to}'")]
    MissingDependency { from: TaskId, to: TaskId },

    /// Attempted to add a duplicate task.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// Task not found in the DAG.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The graph has no tasks at all.
    #[error("DAG has no tasks")]
    Empty,

    /// The graph does not have exactly one task without upstream dependencies.
    #[error("expected exactly one start task, found [{}]", join_ids(.0))]
    InvalidStart(Vec<TaskId>),

    /// The graph does not have exactly one task without downstream dependents.
    #[error("expected exactly one end task, found [{}]", join_ids(.0))]
    InvalidEnd(Vec<TaskId>),

    /// A branch declares no successors.
    #[error("branch '{0}' declares no successors")]
    NoSuccessors(TaskId),

    /// A branch declares the same successor twice.
    #[error("branch '{branch}' declares successor '{successor}' more than once")]
    DuplicateSuccessor { branch: TaskId, successor: TaskId },

    /// A branch's fallback is not one of its declared successors.
    #[error("branch '{branch}' falls back to '{fallback}', which is not a declared successor")]
    MissingFallback { branch: TaskId, fallback: TaskId },

    /// A branch declares a successor that is not in the graph.
    #[error("branch '{branch}' declares unknown successor '{successor}'")]
    UnknownSuccessor { branch: TaskId, successor: TaskId },

    /// A task depends on a branch without being one of its declared successors.
    #[error("task '{task}' depends on branch '{branch}' but is not a declared successor")]
    UndeclaredSuccessor { branch: TaskId, task: TaskId },

    /// A declared successor does not depend on its branch.
    #[error("successor '{successor}' of branch '{branch}' does not depend on it")]
    DetachedSuccessor { branch: TaskId, successor: TaskId },
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rule deciding whether a task runs once all of its upstream tasks are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCondition {
    /// Ordinary task: run if no upstream failed and at least one upstream
    /// path is live. A failed upstream, or every upstream skipped, skips it.
    #[default]
    NoneFailed,

    /// Join task: run if no upstream failed and at least one succeeded,
    /// however many were skipped.
    MinOneSuccess,
}

/// Result of evaluating a pending task against its upstream statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one upstream task is not terminal yet.
    Waiting,
    /// The task may run.
    Ready,
    /// The task will never run in this execution.
    Skip,
}

impl TaskCondition {
    /// Evaluate this condition against the statuses of a task's upstreams.
    pub fn evaluate<'a, I>(&self, upstream: I) -> Readiness
    where
        I: IntoIterator<Item = &'a TaskStatus>,
    {
        let statuses: Vec<&TaskStatus> = upstream.into_iter().collect();
        if statuses.iter().any(|s| !s.is_terminal()) {
            return Readiness::Waiting;
        }
        if statuses.is_empty() {
            return Readiness::Ready;
        }

        match self {
            TaskCondition::NoneFailed => {
                let any_failed = statuses.iter().any(|s| **s == TaskStatus::Failed);
                let all_skipped = statuses.iter().all(|s| **s == TaskStatus::Skipped);
                if any_failed || all_skipped {
                    Readiness::Skip
                } else {
                    Readiness::Ready
                }
            }
            TaskCondition::MinOneSuccess => {
                let any_failed = statuses.iter().any(|s| **s == TaskStatus::Failed);
                let any_succeeded = statuses.iter().any(|s| **s == TaskStatus::Succeeded);
                if any_succeeded && !any_failed {
                    Readiness::Ready
                } else {
                    Readiness::Skip
                }
            }
        }
    }
}

/// A branch point: a selector task plus its closed set of successors.
#[derive(Clone)]
pub struct BranchNode {
    /// The selector implementation.
    pub task: Arc<dyn BranchTask>,

    /// Successors, one of which is activated per run.
    pub successors: Vec<TaskId>,

    /// Successor activated when the selector names anything undeclared.
    pub fallback: TaskId,
}

impl BranchNode {
    /// Map a selector result onto a declared successor.
    ///
    /// Total over every input: unknown names resolve to the fallback.
    pub fn resolve(&self, choice: &TaskId) -> TaskId {
        if self.successors.contains(choice) {
            choice.clone()
        } else {
            self.fallback.clone()
        }
    }

    /// Whether `choice` is one of the declared successors.
    pub fn declares(&self, choice: &TaskId) -> bool {
        self.successors.contains(choice)
    }
}

/// What a node executes.
#[derive(Clone)]
pub enum NodeKind {
    /// An ordinary task producing outputs.
    Task(Arc<dyn Task>),
    /// A branch selecting one successor.
    Branch(BranchNode),
}

/// A node in the DAG.
#[derive(Clone)]
pub struct TaskNode {
    /// The task ID.
    pub id: TaskId,

    /// The work this node performs.
    pub kind: NodeKind,

    /// Condition for execution.
    pub condition: TaskCondition,
}

impl TaskNode {
    /// Wrap an ordinary task with the default condition.
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            id: TaskId::new(task.name()),
            kind: NodeKind::Task(task),
            condition: TaskCondition::default(),
        }
    }

    /// Retry policy declared by the underlying task.
    pub fn retry_policy(&self) -> RetryPolicy {
        match &self.kind {
            NodeKind::Task(task) => task.retry_policy(),
            NodeKind::Branch(branch) => branch.task.retry_policy(),
        }
    }

    /// Minimum duration of a successful attempt, if the task declares one.
    pub fn min_duration(&self) -> Option<Duration> {
        match &self.kind {
            NodeKind::Task(task) => task.min_duration(),
            NodeKind::Branch(_) => None,
        }
    }

    /// Optional description of the underlying task.
    pub fn description(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Task(task) => task.description(),
            NodeKind::Branch(branch) => branch.task.description(),
        }
    }

    /// Branch details, if this node is a branch.
    pub fn as_branch(&self) -> Option<&BranchNode> {
        match &self.kind {
            NodeKind::Branch(branch) => Some(branch),
            NodeKind::Task(_) => None,
        }
    }

    /// Whether this node converges paths.
    pub fn is_join(&self) -> bool {
        self.condition == TaskCondition::MinOneSuccess
    }
}

/// A Directed Acyclic Graph of tasks.
#[derive(Clone)]
pub struct Dag {
    /// Unique identifier for this DAG.
    id: DagId,

    /// Human-readable name.
    name: String,

    /// Task nodes indexed by ID.
    nodes: HashMap<TaskId, TaskNode>,

    /// Task IDs in declaration order.
    order: Vec<TaskId>,

    /// Edges: task_id -> list of tasks it depends on.
    dependencies: HashMap<TaskId, Vec<TaskId>>,
}

impl std::fmt::Debug for Dag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dag")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("order", &self.order)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

impl Dag {
    /// Create a new empty DAG.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DagId::new(id),
            name: name.into(),
            nodes: HashMap::new(),
            order: Vec::new(),
            dependencies: HashMap::new(),
        }
    }

    /// Get the DAG ID.
    pub fn id(&self) -> &DagId {
        &self.id
    }

    /// Get the DAG name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the DAG is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get the number of tasks in the DAG.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Add a task to the DAG with no dependencies.
    pub fn add_task(&mut self, task: Arc<dyn Task>) -> Result<(), DagError> {
        self.add_task_with_condition(task, TaskCondition::default())
    }

    /// Add a task with a specific execution condition.
    pub fn add_task_with_condition(
        &mut self,
        task: Arc<dyn Task>,
        condition: TaskCondition,
    ) -> Result<(), DagError> {
        self.insert_node(TaskNode {
            condition,
            ..TaskNode::new(task)
        })
    }

    /// Add a branch node with its successor set and fallback.
    ///
    /// Successors are checked by [`validate`](Self::validate); they may be
    /// added to the DAG after the branch itself.
    pub fn add_branch(
        &mut self,
        task: Arc<dyn BranchTask>,
        successors: &[&str],
        fallback: &str,
    ) -> Result<(), DagError> {
        let id = TaskId::new(task.name());
        self.insert_node(TaskNode {
            id,
            kind: NodeKind::Branch(BranchNode {
                task,
                successors: successors.iter().map(|s| TaskId::new(*s)).collect(),
                fallback: TaskId::new(fallback),
            }),
            condition: TaskCondition::default(),
        })
    }

    fn insert_node(&mut self, node: TaskNode) -> Result<(), DagError> {
        if self.nodes.contains_key(&node.id) {
            return Err(DagError::DuplicateTask(node.id));
        }

        self.order.push(node.id.clone());
        self.dependencies.insert(node.id.clone(), Vec::new());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add a dependency: `from` depends on `to` (to must complete before from).
    ///
    /// Adding the same edge twice is a no-op.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<(), DagError> {
        if !self.nodes.contains_key(from) {
            return Err(DagError::TaskNotFound(from.clone()));
        }
        if !self.nodes.contains_key(to) {
            return Err(DagError::MissingDependency {
                from: from.clone(),
                to: to.clone(),
            });
        }
        if from == to {
            return Err(DagError::CycleDetected(from.clone()));
        }

        let deps = self.dependencies.entry(from.clone()).or_default();
        if !deps.contains(to) {
            deps.push(to.clone());
        }

        Ok(())
    }

    /// Get a task node by ID.
    pub fn get_task(&self, id: &TaskId) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Get branch details for a node, if it is a branch.
    pub fn get_branch(&self, id: &TaskId) -> Option<&BranchNode> {
        self.nodes.get(id).and_then(TaskNode::as_branch)
    }

    /// Get the dependencies of a task.
    pub fn get_dependencies(&self, id: &TaskId) -> Option<&[TaskId]> {
        self.dependencies.get(id).map(|v| v.as_slice())
    }

    /// Get tasks that depend on the given task, in declaration order.
    pub fn get_downstream(&self, id: &TaskId) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|task_id| {
                self.dependencies
                    .get(*task_id)
                    .is_some_and(|deps| deps.contains(id))
            })
            .cloned()
            .collect()
    }

    /// Get all task IDs in declaration order.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.order.clone()
    }

    /// Tasks with no upstream dependencies, in declaration order.
    fn roots(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| {
                self.dependencies
                    .get(*id)
                    .is_none_or(|deps| deps.is_empty())
            })
            .cloned()
            .collect()
    }

    /// Tasks nothing depends on, in declaration order.
    fn sinks(&self) -> Vec<TaskId> {
        let upstream: HashSet<&TaskId> = self.dependencies.values().flatten().collect();
        self.order
            .iter()
            .filter(|id| !upstream.contains(id))
            .cloned()
            .collect()
    }

    /// The designated start task, if the graph has exactly one.
    pub fn start_task(&self) -> Option<TaskId> {
        let roots = self.roots();
        match roots.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }

    /// The designated end task, if the graph has exactly one.
    pub fn end_task(&self) -> Option<TaskId> {
        let sinks = self.sinks();
        match sinks.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }

    /// Return tasks in topological order, or an error if there is a cycle.
    ///
    /// Ties are broken by declaration order, so the result is deterministic.
    pub fn topological_sort(&self) -> Result<Vec<TaskId>, DagError> {
        // Kahn's algorithm
        let mut in_degree: HashMap<&TaskId, usize> = HashMap::new();
        let mut reverse_deps: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();

        for id in &self.order {
            let deps = self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[]);
            in_degree.insert(id, deps.len());
            for to in deps {
                reverse_deps.entry(to).or_default().push(id);
            }
        }

        let mut queue: VecDeque<&TaskId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();

        let mut result = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            result.push(id.clone());

            if let Some(downstream) = reverse_deps.get(id) {
                for next in downstream {
                    if let Some(degree) = in_degree.get_mut(next) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(next);
                        }
                    }
                }
            }
        }

        if result.len() != self.order.len() {
            let cycle_node = self
                .order
                .iter()
                .find(|id| in_degree.get(id).is_some_and(|degree| *degree > 0))
                .or_else(|| self.order.first())
                .cloned()
                .unwrap_or_else(|| TaskId::new("<unknown>"));
            return Err(DagError::CycleDetected(cycle_node));
        }

        Ok(result)
    }

    /// Validate the DAG structure.
    ///
    /// Checks dependencies, acyclicity, the single start and end task, and
    /// every branch's successor declaration.
    pub fn validate(&self) -> Result<(), DagError> {
        if self.nodes.is_empty() {
            return Err(DagError::Empty);
        }

        for from in &self.order {
            for to in self.get_dependencies(from).unwrap_or(&[]) {
                if !self.nodes.contains_key(to) {
                    return Err(DagError::MissingDependency {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
        }

        self.topological_sort()?;

        let roots = self.roots();
        if roots.len() != 1 {
            return Err(DagError::InvalidStart(roots));
        }
        let sinks = self.sinks();
        if sinks.len() != 1 {
            return Err(DagError::InvalidEnd(sinks));
        }

        for id in &self.order {
            if let Some(branch) = self.get_branch(id) {
                self.validate_branch(id, branch)?;
            }
        }

        Ok(())
    }

    fn validate_branch(&self, id: &TaskId, branch: &BranchNode) -> Result<(), DagError> {
        if branch.successors.is_empty() {
            return Err(DagError::NoSuccessors(id.clone()));
        }

        let mut seen = HashSet::new();
        for successor in &branch.successors {
            if !seen.insert(successor) {
                return Err(DagError::DuplicateSuccessor {
                    branch: id.clone(),
                    successor: successor.clone(),
                });
            }
            if !self.nodes.contains_key(successor) {
                return Err(DagError::UnknownSuccessor {
                    branch: id.clone(),
                    successor: successor.clone(),
                });
            }
        }

        if !branch.declares(&branch.fallback) {
            return Err(DagError::MissingFallback {
                branch: id.clone(),
                fallback: branch.fallback.clone(),
            });
        }

        let downstream = self.get_downstream(id);
        if let Some(task) = downstream.iter().find(|d| !branch.declares(d)) {
            return Err(DagError::UndeclaredSuccessor {
                branch: id.clone(),
                task: task.clone(),
            });
        }
        if let Some(successor) = branch.successors.iter().find(|s| !downstream.contains(s)) {
            return Err(DagError::DetachedSuccessor {
                branch: id.clone(),
                successor: successor.clone(),
            });
        }

        Ok(())
    }
}

/// Builder for constructing DAGs fluently.
///
/// The first error encountered is kept and returned by [`build`](Self::build).
pub struct DagBuilder {
    dag: Dag,
    error: Option<DagError>,
}

impl DagBuilder {
    /// Create a new DAG builder.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            dag: Dag::new(id, name),
            error: None,
        }
    }

    fn record(&mut self, result: Result<(), DagError>) {
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
    }

    fn add_deps(&mut self, task_id: &TaskId, depends_on: &[&str]) {
        for dep in depends_on {
            let result = self.dag.add_dependency(task_id, &TaskId::new(*dep));
            self.record(result);
        }
    }

    /// Add a task to the DAG.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let result = self.dag.add_task(task);
        self.record(result);
        self
    }

    /// Add a task with dependencies.
    pub fn add_task_with_deps(self, task: Arc<dyn Task>, depends_on: &[&str]) -> Self {
        self.add_task_with_deps_and_condition(task, depends_on, TaskCondition::default())
    }

    /// Add a task with dependencies and a condition.
    pub fn add_task_with_deps_and_condition(
        mut self,
        task: Arc<dyn Task>,
        depends_on: &[&str],
        condition: TaskCondition,
    ) -> Self {
        let task_id = TaskId::new(task.name());
        let result = self.dag.add_task_with_condition(task, condition);
        self.record(result);
        self.add_deps(&task_id, depends_on);
        self
    }

    /// Add a join task that runs when no upstream failed and any succeeded.
    pub fn add_join(self, task: Arc<dyn Task>, depends_on: &[&str]) -> Self {
        self.add_task_with_deps_and_condition(task, depends_on, TaskCondition::MinOneSuccess)
    }

    /// Add a branch with dependencies, its successor set and a fallback.
    ///
    /// The successor edges are wired when the DAG is built.
    pub fn add_branch(
        mut self,
        task: Arc<dyn BranchTask>,
        depends_on: &[&str],
        successors: &[&str],
        fallback: &str,
    ) -> Self {
        let task_id = TaskId::new(task.name());
        let result = self.dag.add_branch(task, successors, fallback);
        self.record(result);
        self.add_deps(&task_id, depends_on);
        self
    }

    /// Add a dependency between tasks.
    pub fn add_dependency(mut self, from: &str, to: &str) -> Self {
        let result = self
            .dag
            .add_dependency(&TaskId::new(from), &TaskId::new(to));
        self.record(result);
        self
    }

    /// Build the DAG, validating it in the process.
    pub fn build(mut self) -> Result<Dag, DagError> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }

        let branches: Vec<(TaskId, Vec<TaskId>)> = self
            .dag
            .order
            .iter()
            .filter_map(|id| {
                self.dag
                    .get_branch(id)
                    .map(|branch| (id.clone(), branch.successors.clone()))
            })
            .collect();

        for (branch, successors) in branches {
            for successor in successors {
                if self.dag.get_task(&successor).is_none() {
                    return Err(DagError::UnknownSuccessor { branch, successor });
                }
                self.dag.add_dependency(&successor, &branch)?;
            }
        }

        self.dag.validate()?;
        Ok(self.dag)
    }
}
