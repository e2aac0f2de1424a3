use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounded grace period during which the bridge waits for the host binding
/// to appear after subscribers have already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Milliseconds between two checks for the host binding
    #[serde(default = "crate::defaults::default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Number of checks before giving up on the host
    #[serde(default = "crate::defaults::default_poll_max_attempts")]
    pub max_attempts: u32,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    /// Total time the poll may run before the attempt budget is exhausted
    pub fn budget(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: crate::defaults::default_poll_interval_ms(),
            max_attempts: crate::defaults::default_poll_max_attempts(),
        }
    }
}
