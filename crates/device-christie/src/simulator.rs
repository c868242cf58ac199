//! Loopback TCP stand-in for the projector, for running without hardware.

use crate::models::*;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Device-side state of the simulated projector.
#[derive(Clone, Debug, Default)]
pub struct SimulatedProjector {
    power: PowerState,
}

impl SimulatedProjector {
    pub fn new(power: PowerState) -> Self {
        Self { power }
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    /// The frame the projector sends back for one command packet.
    pub fn respond(&mut self, packet: &[u8]) -> Vec<u8> {
        match ProjectorCommand::from_bytes(packet) {
            Some(ProjectorCommand::QueryPower) => {
                let status = match self.power {
                    PowerState::Off => 0x00,
                    PowerState::On => 0x01,
                    PowerState::Cooldown => 0x02,
                    PowerState::Unknown => 0xFF,
                };
                vec![TAG_DATA, status, 0x00]
            }
            Some(ProjectorCommand::PowerOn) => {
                self.power = PowerState::On;
                vec![TAG_ACK]
            }
            Some(ProjectorCommand::PowerOff) => {
                self.power = PowerState::Off;
                vec![TAG_ACK]
            }
            None => vec![TAG_NAK],
        }
    }
}

/// Start a simulated projector on a loopback port, initially powered off.
pub async fn spawn() -> std::io::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let device = Arc::new(Mutex::new(SimulatedProjector::new(PowerState::Off)));

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("Simulated projector accepted {}", peer);
                    tokio::spawn(serve(stream, device.clone()));
                }
                Err(e) => {
                    tracing::warn!("Simulated projector accept failed: {}", e);
                    break;
                }
            }
        }
    });

    Ok(addr)
}

async fn serve(mut stream: TcpStream, device: Arc<Mutex<SimulatedProjector>>) {
    let mut packet = [0u8; PACKET_LEN];
    while stream.read_exact(&mut packet).await.is_ok() {
        let reply = match device.lock() {
            Ok(mut device) => device.respond(&packet),
            Err(_) => break,
        };
        if stream.write_all(&reply).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respond_tracks_power() {
        let mut device = SimulatedProjector::default();
        let query = ProjectorCommand::QueryPower.packet().to_bytes();

        assert_eq!(device.respond(&query), vec![TAG_DATA, 0xFF, 0x00]);
        assert_eq!(device.respond(&ProjectorCommand::PowerOn.packet().to_bytes()), vec![TAG_ACK]);
        assert_eq!(device.power(), PowerState::On);
        assert_eq!(device.respond(&query), vec![TAG_DATA, 0x01, 0x00]);
        assert_eq!(device.respond(&ProjectorCommand::PowerOff.packet().to_bytes()), vec![TAG_ACK]);
        assert_eq!(device.respond(&query), vec![TAG_DATA, 0x00, 0x00]);
    }

    #[test]
    fn test_unknown_packet_is_refused() {
        let mut device = SimulatedProjector::default();
        assert_eq!(device.respond(&[0u8; PACKET_LEN]), vec![TAG_NAK]);
    }
}
