//! Engine configuration.

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// What `enroll` does when the learner is already enrolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReenrollPolicy {
    /// Fail with `AlreadyEnrolled`
    #[default]
    Reject,
    /// Return the existing enrollment unchanged
    ReturnExisting,
}

/// Configuration for the learning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts at a progress commit before giving up on revision conflicts
    pub max_commit_attempts: u32,
    /// Re-enrollment policy, applied to every enroll call
    pub reenroll_policy: ReenrollPolicy,
    /// Upper bound on a single operation, in milliseconds (None = unbounded)
    pub operation_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 5,
            reenroll_policy: ReenrollPolicy::Reject,
            operation_timeout_ms: Some(10_000),
        }
    }
}

impl EngineConfig {
    /// Operation timeout as a duration.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}
