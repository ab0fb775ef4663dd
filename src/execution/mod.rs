//! Task execution engine.
//!
//! This module provides the execution infrastructure for running single
//! tasks (retry, pacing, concurrency) and whole DAG runs.

mod dag_executor;
mod executor;

pub use dag_executor::{DagExecutor, DagResult};
pub use executor::{AttemptObserver, NoopObserver, TaskExecutor, TaskResult};
