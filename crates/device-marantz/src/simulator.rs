//! In-process stand-in for the receiver, for running without hardware.

use crate::models::*;
use std::ops::Range;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Reply latency range of the simulated device, in milliseconds.
pub const DEFAULT_LATENCY_MS: Range<u64> = 100..300;

/// Device-side state of the simulated receiver.
#[derive(Clone, Debug)]
pub struct SimulatedReceiver {
    input: String,
    volume: u16,
    mute: bool,
}

impl Default for SimulatedReceiver {
    fn default() -> Self {
        Self {
            input: "DVD".to_string(),
            volume: 400,
            mute: false,
        }
    }
}

impl SimulatedReceiver {
    /// The line the device would emit in response to `command`, if any.
    pub fn respond(&mut self, command: &str) -> Option<String> {
        match command {
            "MV?" => Some(self.volume_line()),
            "MU?" => Some(self.mute_line()),
            "SI?" => Some(format!("SI{}", self.input)),
            "MVUP" => {
                self.volume = (self.volume + VOLUME_STEP).min(MAX_VOLUME);
                Some(self.volume_line())
            }
            "MVDOWN" => {
                self.volume = self.volume.saturating_sub(VOLUME_STEP).max(MIN_VOLUME);
                Some(self.volume_line())
            }
            "MUON" | "MUOFF" => {
                self.mute = command == "MUON";
                Some(self.mute_line())
            }
            _ => {
                if let Some(value) = command.strip_prefix("MV") {
                    self.volume = parse_volume(value)?.min(MAX_VOLUME);
                    Some(self.volume_line())
                } else if let Some(input) = command.strip_prefix("SI") {
                    self.input = input.to_string();
                    Some(command.to_string())
                } else {
                    None
                }
            }
        }
    }

    fn volume_line(&self) -> String {
        format!("MV{}", volume_suffix(self.volume))
    }

    fn mute_line(&self) -> String {
        if self.mute { "MUON" } else { "MUOFF" }.to_string()
    }
}

/// Start a simulated receiver and return the controller's end of its link.
pub fn spawn() -> DuplexStream {
    spawn_with_latency(DEFAULT_LATENCY_MS)
}

/// Like [`spawn`], with a custom reply latency range in milliseconds.
pub fn spawn_with_latency(latency_ms: Range<u64>) -> DuplexStream {
    let (controller_end, device_end) = tokio::io::duplex(1024);
    tokio::spawn(run(device_end, latency_ms));
    controller_end
}

async fn run(device_end: DuplexStream, latency_ms: Range<u64>) {
    let (reader, mut writer) = tokio::io::split(device_end);
    let mut reader = BufReader::new(reader);
    let mut device = SimulatedReceiver::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\r', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let command = String::from_utf8_lossy(&buf).trim().to_string();
        let Some(reply) = device.respond(&command) else {
            tracing::debug!("Simulated receiver ignoring {:?}", command);
            continue;
        };

        let delay = if latency_ms.is_empty() {
            0
        } else {
            fastrand::u64(latency_ms.clone())
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;

        if writer.write_all(format!("{}\r", reply).as_bytes()).await.is_err() {
            break;
        }
    }

    tracing::debug!("Simulated receiver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_queries() {
        let mut device = SimulatedReceiver::default();
        assert_eq!(device.respond("MV?").as_deref(), Some("MV40"));
        assert_eq!(device.respond("MU?").as_deref(), Some("MUOFF"));
        assert_eq!(device.respond("SI?").as_deref(), Some("SIDVD"));
    }

    #[test]
    fn test_volume_steps_clamp() {
        let mut device = SimulatedReceiver::default();
        assert_eq!(device.respond("MV795").as_deref(), Some("MV795"));
        assert_eq!(device.respond("MVUP").as_deref(), Some("MV80"));
        assert_eq!(device.respond("MVUP").as_deref(), Some("MV80"));
        assert_eq!(device.respond("MV00").as_deref(), Some("MV00"));
        assert_eq!(device.respond("MVDOWN").as_deref(), Some("MV00"));
    }

    #[test]
    fn test_set_commands_echo() {
        let mut device = SimulatedReceiver::default();
        assert_eq!(device.respond("SICD").as_deref(), Some("SICD"));
        assert_eq!(device.respond("MUON").as_deref(), Some("MUON"));
        assert_eq!(device.respond("MU?").as_deref(), Some("MUON"));
        assert_eq!(device.respond("PWON"), None);
        assert_eq!(device.respond("MVbogus"), None);
    }
}
