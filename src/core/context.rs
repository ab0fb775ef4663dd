//! Task execution context and inter-task communication.
//!
//! Tasks communicate via an in-memory key-value store. Reading goes through
//! a per-task snapshot, writing goes to a task-local buffer, and the
//! scheduler merges the buffer back only once the task has succeeded:
//!
//! - [`ContextStore`]: Shared store of completed task outputs
//! - [`OutputBuffer`]: Task-local write buffer, merged on successful completion
//! - [`TaskContext`]: Combines the input snapshot and the output buffer

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use super::types::TaskId;

/// Errors that can occur when working with the context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Key was not found in the context.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Failed to deserialize value from context.
    #[error("deserialization error for key '{key}': {message}")]
    DeserializationError { key: String, message: String },

    /// Failed to serialize value for context.
    #[error("serialization error for key '{key}': {message}")]
    SerializationError { key: String, message: String },

    /// Context lock was poisoned (concurrent access failure).
    #[error("context lock poisoned")]
    LockPoisoned,
}

/// Shared context store for a DAG run.
///
/// The store is in-memory and lives for one run only; it is not meant for
/// persistence or history.
///
/// `ContextStore` is `Clone`; clones share the same data. Use
/// [`snapshot`](Self::snapshot) for an independent copy.
#[derive(Clone, Default)]
pub struct ContextStore {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl ContextStore {
    /// Create a new empty context store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with data.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    /// Get a value by key.
    ///
    /// Keys are namespaced as `"{task_id}.{key}"`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, ContextError> {
        let store = self.inner.read().map_err(|_| ContextError::LockPoisoned)?;
        let value = store
            .get(key)
            .ok_or_else(|| ContextError::KeyNotFound(key.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|e| ContextError::DeserializationError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Get an optional value by key. Returns None if the key doesn't exist.
    pub fn get_optional<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let store = self.inner.read().ok()?;
        let value = store.get(key)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Insert a raw value, bypassing task namespacing.
    pub fn set_raw(&self, key: impl Into<String>, value: Value) -> Result<(), ContextError> {
        let mut store = self.inner.write().map_err(|_| ContextError::LockPoisoned)?;
        store.insert(key.into(), value);
        Ok(())
    }

    /// Check if a key exists in the context.
    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .read()
            .map(|s| s.contains_key(key))
            .unwrap_or(false)
    }

    /// Get all keys in the context.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Copy the current contents into a new, unshared store.
    ///
    /// Every dispatched task reads from its own snapshot, so concurrently
    /// running tasks never observe each other's partial results.
    pub fn snapshot(&self) -> Result<Self, ContextError> {
        let store = self.inner.read().map_err(|_| ContextError::LockPoisoned)?;
        Ok(Self::from_map(store.clone()))
    }

    /// Clone the contents into a plain map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.inner.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Merge a task's output buffer into the store.
    ///
    /// Only called by the executor after a task succeeded. If a key already
    /// exists, the buffer's value overwrites it.
    pub fn merge(&self, buffer: &OutputBuffer) -> Result<(), ContextError> {
        let mut store = self.inner.write().map_err(|_| ContextError::LockPoisoned)?;
        for (key, value) in &buffer.outputs {
            store.insert(key.clone(), value.clone());
        }
        Ok(())
    }
}

/// Task-local output buffer.
///
/// Tasks write outputs to this buffer during execution. The buffer is
/// merged into the shared [`ContextStore`] only after the task succeeded,
/// so failed attempts never leak partial data downstream.
///
/// All keys are prefixed with the task ID: calling `set("record", ..)` from
/// task "format_data" creates key "format_data.record".
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    task_id: TaskId,
    outputs: HashMap<String, Value>,
}

impl OutputBuffer {
    /// Create a new output buffer for a task.
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            outputs: HashMap::new(),
        }
    }

    /// Write a value to the buffer under `"{task_id}.{key}"`.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<(), ContextError> {
        let full_key = format!("{}.{}", self.task_id, key);
        let json_value =
            serde_json::to_value(value).map_err(|e| ContextError::SerializationError {
                key: full_key.clone(),
                message: e.to_string(),
            })?;
        self.outputs.insert(full_key, json_value);
        Ok(())
    }

    /// Drop everything written so far.
    pub fn clear(&mut self) {
        self.outputs.clear();
    }

    /// Get the task ID associated with this buffer.
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Get the number of outputs in the buffer.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Get all keys in the buffer.
    pub fn keys(&self) -> Vec<String> {
        self.outputs.keys().cloned().collect()
    }

    /// Get a value from the buffer (for testing/debugging).
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.outputs.get(key).cloned()
    }
}

/// Execution context passed to tasks.
///
/// Provides access to:
/// - Inputs from upstream tasks (a [`ContextStore`] snapshot)
/// - Output buffer for downstream tasks (via [`OutputBuffer`])
pub struct TaskContext {
    /// Read inputs from upstream tasks.
    pub inputs: ContextStore,

    /// Write outputs for downstream tasks (local buffer, merged on success).
    pub outputs: OutputBuffer,
}

impl TaskContext {
    /// Create a context reading from `store` and writing under `task_id`.
    pub fn new(store: ContextStore, task_id: TaskId) -> Self {
        Self {
            inputs: store,
            outputs: OutputBuffer::new(task_id),
        }
    }
}
