use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum gap between two commands written to the receiver.
pub const MIN_COMMAND_DELAY: Duration = Duration::from_millis(200);

/// Receiver connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Serial device path.
    pub port: String,
    pub baud_rate: u32,
    pub min_command_delay_ms: u64,
    /// Talk to an in-process simulator instead of the serial port.
    pub simulate: bool,
}

impl ReceiverConfig {
    pub fn min_command_delay(&self) -> Duration {
        Duration::from_millis(self.min_command_delay_ms)
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyAMA0".to_string(),
            baud_rate: 9600,
            min_command_delay_ms: MIN_COMMAND_DELAY.as_millis() as u64,
            simulate: false,
        }
    }
}
