use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Projector connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    pub address: String,
    pub port: u16,
    /// Abandon a request that has had no response after this long.
    /// Unset means wait indefinitely.
    pub response_timeout_ms: Option<u64>,
    /// How often connected UI clients trigger a status refresh.
    pub poll_interval_secs: u64,
    /// Talk to an in-process simulator instead of the real projector.
    pub simulate: bool,
}

impl ProjectorConfig {
    pub fn response_timeout(&self) -> Option<Duration> {
        self.response_timeout_ms.map(Duration::from_millis)
    }

    /// Poll period, at least one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 23,
            response_timeout_ms: None,
            poll_interval_secs: 10,
            simulate: false,
        }
    }
}
