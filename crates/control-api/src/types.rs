/// Message and response types for the Control API
use avhub_device_christie::ProjectorState;
use avhub_device_marantz::ReceiverState;
use serde::{Deserialize, Serialize};

/// Level the "volume-default" button sets.
pub const DEFAULT_UI_VOLUME: f64 = 0.65;

/// Message sent by a client over `/ws`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Source { input: String },
    /// Toggle the current mute state
    Mute,
    VolumeDefault,
    VolumeUp,
    VolumeDown,
    ProjectorOn,
    ProjectorOff,
}

/// Message pushed to clients over `/ws`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    State(ReceiverState),
    ProjectorState(ProjectorState),
}

/// Response for GET /v1/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub clients: usize,
}
