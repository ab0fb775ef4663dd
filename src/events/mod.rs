//! Lifecycle events and event handling.
//!
//! This module provides event emission for run and task lifecycle events,
//! enabling observability into DAG execution.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{DagId, RunId, TaskId};

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A run has started.
    RunStarted {
        dag_id: DagId,
        run_id: RunId,
        timestamp: Instant,
    },

    /// A run finished, successfully or not.
    RunCompleted {
        dag_id: DagId,
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task has started execution.
    TaskStarted {
        task_id: TaskId,
        dag_id: DagId,
        timestamp: Instant,
    },

    /// A task completed successfully.
    TaskCompleted {
        task_id: TaskId,
        dag_id: DagId,
        duration: Duration,
        timestamp: Instant,
    },

    /// A task failed after exhausting its retry policy.
    TaskFailed {
        task_id: TaskId,
        dag_id: DagId,
        error: String,
        attempts: u32,
        timestamp: Instant,
    },

    /// A task is being retried after failure.
    ///
    /// Emitted immediately before the retry delay.
    TaskRetrying {
        task_id: TaskId,
        dag_id: DagId,
        /// The attempt number that just failed (1-indexed).
        attempt: u32,
        /// Total number of attempts allowed, including the initial one.
        max_attempts: u32,
        /// Delay before the next attempt.
        delay: Duration,
        timestamp: Instant,
    },

    /// A task will not run in this execution.
    TaskSkipped {
        task_id: TaskId,
        dag_id: DagId,
        timestamp: Instant,
    },

    /// A branch activated one of its successors.
    BranchSelected {
        task_id: TaskId,
        dag_id: DagId,
        selected: TaskId,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::RunStarted { timestamp, .. }
            | Event::RunCompleted { timestamp, .. }
            | Event::TaskStarted { timestamp, .. }
            | Event::TaskCompleted { timestamp, .. }
            | Event::TaskFailed { timestamp, .. }
            | Event::TaskRetrying { timestamp, .. }
            | Event::TaskSkipped { timestamp, .. }
            | Event::BranchSelected { timestamp, .. } => *timestamp,
        }
    }

    /// The task this event is about, if any.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Event::RunStarted { .. } | Event::RunCompleted { .. } => None,
            Event::TaskStarted { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::TaskRetrying { task_id, .. }
            | Event::TaskSkipped { task_id, .. }
            | Event::BranchSelected { task_id, .. } => Some(task_id),
        }
    }

    /// Create a RunStarted event.
    pub fn run_started(dag_id: DagId, run_id: RunId) -> Self {
        Event::RunStarted {
            dag_id,
            run_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a RunCompleted event.
    pub fn run_completed(dag_id: DagId, run_id: RunId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            dag_id,
            run_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(task_id: TaskId, dag_id: DagId) -> Self {
        Event::TaskStarted {
            task_id,
            dag_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskCompleted event.
    pub fn task_completed(task_id: TaskId, dag_id: DagId, duration: Duration) -> Self {
        Event::TaskCompleted {
            task_id,
            dag_id,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFailed event.
    pub fn task_failed(task_id: TaskId, dag_id: DagId, error: String, attempts: u32) -> Self {
        Event::TaskFailed {
            task_id,
            dag_id,
            error,
            attempts,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskRetrying event.
    pub fn task_retrying(
        task_id: TaskId,
        dag_id: DagId,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    ) -> Self {
        Event::TaskRetrying {
            task_id,
            dag_id,
            attempt,
            max_attempts,
            delay,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskSkipped event.
    pub fn task_skipped(task_id: TaskId, dag_id: DagId) -> Self {
        Event::TaskSkipped {
            task_id,
            dag_id,
            timestamp: Instant::now(),
        }
    }

    /// Create a BranchSelected event.
    pub fn branch_selected(task_id: TaskId, dag_id: DagId, selected: TaskId) -> Self {
        Event::BranchSelected {
            task_id,
            dag_id,
            selected,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
