use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of every command packet.
pub const PACKET_LEN: usize = 13;

/// Constant packet header.
pub const HEADER: [u8; 5] = [0xBE, 0xEF, 0x03, 0x06, 0x00];

/// Action codes (little-endian on the wire).
pub const ACTION_SET: u16 = 0x0001;
pub const ACTION_GET: u16 = 0x0002;

/// Type code for the power subsystem.
pub const TYPE_POWER: u16 = 0x6000;

/// Response tags.
pub const TAG_ACK: u8 = 0x06;
pub const TAG_NAK: u8 = 0x15;
pub const TAG_ERROR: u8 = 0x1C;
pub const TAG_DATA: u8 = 0x1D;
pub const TAG_AUTH_ERROR: u8 = 0x1F;

/// Projector power as reported by the status query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    Off,
    On,
    Cooldown,
    #[default]
    Unknown,
}

impl PowerState {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => PowerState::Off,
            0x01 => PowerState::On,
            0x02 => PowerState::Cooldown,
            _ => PowerState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::Off => "off",
            PowerState::On => "on",
            PowerState::Cooldown => "cooldown",
            PowerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the projector as last confirmed by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorState {
    pub power: PowerState,
}

/// Fixed-layout command packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Precomputed per command; never derived at runtime.
    pub crc: [u8; 2],
    pub action: u16,
    pub kind: u16,
    pub setting: u16,
}

impl Packet {
    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let mut bytes = [0u8; PACKET_LEN];
        bytes[..5].copy_from_slice(&HEADER);
        bytes[5..7].copy_from_slice(&self.crc);
        bytes[7..9].copy_from_slice(&self.action.to_le_bytes());
        bytes[9..11].copy_from_slice(&self.kind.to_le_bytes());
        bytes[11..13].copy_from_slice(&self.setting.to_le_bytes());
        bytes
    }
}

/// Commands the projector channel knows how to send and decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProjectorCommand {
    QueryPower,
    PowerOn,
    PowerOff,
}

impl ProjectorCommand {
    pub fn packet(&self) -> Packet {
        match self {
            ProjectorCommand::QueryPower => Packet {
                crc: [0x19, 0xD3],
                action: ACTION_GET,
                kind: TYPE_POWER,
                setting: 0x0000,
            },
            ProjectorCommand::PowerOn => Packet {
                crc: [0xBA, 0xD2],
                action: ACTION_SET,
                kind: TYPE_POWER,
                setting: 0x0001,
            },
            ProjectorCommand::PowerOff => Packet {
                crc: [0x2A, 0xD3],
                action: ACTION_SET,
                kind: TYPE_POWER,
                setting: 0x0000,
            },
        }
    }

    /// Identify a command from its wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        [ProjectorCommand::QueryPower, ProjectorCommand::PowerOn, ProjectorCommand::PowerOff]
            .into_iter()
            .find(|c| c.packet().to_bytes() == bytes)
    }
}

/// What a completed projector command resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProjectorReply {
    /// A set command was acknowledged (`true`) or refused (`false`).
    Accepted(bool),
    /// Decoded status report.
    Power(PowerState),
}
