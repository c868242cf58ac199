//! Line protocol spoken by the receiver over its serial port.

use crate::models::*;
use avhub_core::{Classified, Protocol, RequestId};

/// Receiver side of the text channel: command encoding, line
/// classification and the state mirror those lines update.
#[derive(Clone, Debug)]
pub struct MarantzProtocol {
    input: String,
    volume: u16,
    mute: bool,
}

impl Default for MarantzProtocol {
    fn default() -> Self {
        let initial = ReceiverState::default();
        Self {
            input: initial.input,
            volume: initial.volume_raw,
            mute: initial.mute,
        }
    }
}

impl MarantzProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReceiverState {
        ReceiverState {
            input: self.input.clone(),
            volume: normalize_volume(self.volume),
            volume_raw: self.volume,
            mute: self.mute,
        }
    }

    /// Native volume as last reported.
    pub fn volume(&self) -> u16 {
        self.volume
    }

    /// Apply one inbound line. Returns the property it updated.
    fn apply(&mut self, line: &str) -> Option<Property> {
        let Some(property) = Property::of_line(line) else {
            tracing::debug!("Ignoring unrecognised receiver line: {:?}", line);
            return None;
        };
        let value = &line[2..];

        match property {
            Property::Source => {
                self.input = value.to_string();
                tracing::info!("Receiver input changed: {}", self.input);
            }
            Property::Mute => {
                self.mute = value == "ON";
                tracing::info!("Receiver mute changed: {}", self.mute);
            }
            Property::Volume => {
                if line.contains(MAX_VOLUME_MARKER) {
                    tracing::debug!("Ignoring volume ceiling report: {}", line);
                    return None;
                }
                let Some(volume) = parse_volume(value) else {
                    tracing::warn!("Unparseable volume report: {:?}", line);
                    return None;
                };
                self.volume = volume;
                tracing::info!("Receiver volume changed to: {}", self.volume);
            }
        }

        Some(property)
    }
}

impl Protocol for MarantzProtocol {
    type Command = ReceiverCommand;
    type Inbound = str;
    type Key = Property;
    type Reply = ReceiverState;

    fn correlation_key(&self, _id: RequestId, command: &ReceiverCommand) -> Property {
        command.property()
    }

    fn encode(&self, command: &ReceiverCommand) -> Vec<u8> {
        format!("{}\r", command.wire()).into_bytes()
    }

    fn classify(&mut self, line: &str, _in_flight: Option<&ReceiverCommand>) -> Classified<Property, ReceiverState> {
        let line = line.trim();
        tracing::debug!("Got receiver data: {}", line);

        match self.apply(line) {
            // Every parsed report counts as a change, even when the value is the same.
            Some(key) => Classified::Report {
                key,
                reply: self.state(),
                changed: true,
            },
            None => Classified::Ignored,
        }
    }
}
