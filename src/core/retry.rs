//! Retry policy configuration for tasks.
//!
//! Supports fixed delay retry with a bounded number of attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task::TaskError;

/// Retry policy for a task.
///
/// Defines how a failing task is re-executed. The policy is a value object
/// handed to each task at construction; the executor consults it, the task
/// never does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the initial one. Always at least 1.
    /// For example, `max_attempts = 2` means one retry after the first failure.
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(with = "serde_duration")]
    pub delay: Duration,
}

/// Outcome of consulting a [`RetryPolicy`] after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the task again after the given delay.
    Retry(Duration),
    /// The attempt budget is spent; the failure becomes terminal.
    GiveUp,
}

impl RetryPolicy {
    /// Create a policy with a single attempt and no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Create a policy with fixed delay retries.
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts including the initial one (clamped to at least 1)
    /// * `delay` - Fixed delay between attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Decide what happens after attempt number `attempt` (1-indexed) failed.
    ///
    /// Every failure is treated as retryable until the attempt budget is
    /// spent; the failure's content is not inspected.
    pub fn decide(&self, attempt: u32, _failure: &TaskError) -> RetryDecision {
        if attempt < self.max_attempts {
            RetryDecision::Retry(self.delay)
        } else {
            RetryDecision::GiveUp
        }
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as seconds (matching the YAML config format).
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
