//! Core engine types: identifiers, tasks, retry policies, the graph and
//! per-run execution records.

pub mod context;
pub mod dag;
pub mod retry;
pub mod state;
pub mod task;
pub mod types;
