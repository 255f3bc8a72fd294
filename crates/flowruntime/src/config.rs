use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on node invocations in one flow run, guarding against
    /// action cycles that never terminate
    pub max_steps: usize,

    /// Timeout of HTTP nodes that do not set their own
    pub default_http_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            default_http_timeout: Duration::from_secs(30),
        }
    }
}
