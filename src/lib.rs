//! userflow - a small task-graph engine and the `user_registry` pipeline
//! running on it.
//!
//! The engine runs a validated [`Dag`] once: nodes start when their
//! [`TaskCondition`] holds, failures are retried per [`RetryPolicy`], a
//! branch node activates exactly one successor and everything it did not
//! pick is skipped.

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod pipeline;
pub mod testing;

pub use config::{ConfigError, PipelineConfig, YamlLoader};
pub use core::context::{ContextError, ContextStore, OutputBuffer, TaskContext};
pub use core::dag::{BranchNode, Dag, DagBuilder, DagError, Readiness, TaskCondition, TaskNode};
pub use core::retry::{RetryDecision, RetryPolicy};
pub use core::state::{ExecutionState, RunOutcome, RunPhase, StateError, TaskStatus};
pub use core::task::{BranchTask, Task, TaskError};
pub use core::types::{DagId, RunId, TaskId};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{DagExecutor, DagResult, TaskExecutor, TaskResult};
pub use pipeline::build_user_registry;
