//! Binary response framing for the projector's serial-over-TCP protocol.

use crate::models::*;
use avhub_core::{Classified, Protocol, RequestId};

/// One response frame, classified by its leading tag byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nak,
    /// Error report with its two detail bytes.
    Error([u8; 2]),
    Data(u8, u8),
    AuthError,
    /// A known tag whose frame has the wrong length.
    Malformed { tag: u8, len: usize },
    Unknown(u8),
    Empty,
}

impl Frame {
    pub fn parse(bytes: &[u8]) -> Frame {
        let Some(&tag) = bytes.first() else {
            return Frame::Empty;
        };

        match (tag, bytes) {
            (TAG_ACK, _) => Frame::Ack,
            (TAG_NAK, _) => Frame::Nak,
            (TAG_ERROR, &[_, a, b]) => Frame::Error([a, b]),
            (TAG_DATA, &[_, a, b]) => Frame::Data(a, b),
            (TAG_ERROR | TAG_DATA, _) => Frame::Malformed {
                tag,
                len: bytes.len(),
            },
            (TAG_AUTH_ERROR, _) => Frame::AuthError,
            _ => Frame::Unknown(tag),
        }
    }
}

/// Payload handed to a command's decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    /// ACK (`true`) or NAK (`false`).
    Ack(bool),
    Data(u8, u8),
}

/// Projector side of the binary channel: packet encoding, response
/// classification and the power-state mirror.
#[derive(Clone, Debug, Default)]
pub struct ChristieProtocol {
    power: PowerState,
}

impl ChristieProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProjectorState {
        ProjectorState { power: self.power }
    }

    /// Run `command`'s decoder. Returns the reply and whether state changed.
    pub fn decode(&mut self, command: ProjectorCommand, payload: Payload) -> (ProjectorReply, bool) {
        match command {
            ProjectorCommand::QueryPower => {
                let power = match payload {
                    Payload::Data(byte1, _) => PowerState::from_byte(byte1),
                    Payload::Ack(_) => PowerState::Unknown,
                };

                let changed = power != self.power;
                if changed {
                    tracing::info!("Projector power changed: {} -> {}", self.power, power);
                    self.power = power;
                }
                (ProjectorReply::Power(power), changed)
            }
            ProjectorCommand::PowerOn | ProjectorCommand::PowerOff => {
                let ok = match payload {
                    Payload::Ack(ok) => ok,
                    Payload::Data(..) => true,
                };
                tracing::info!("{:?}: {}", command, ok);
                (ProjectorReply::Accepted(ok), false)
            }
        }
    }
}

impl Protocol for ChristieProtocol {
    type Command = ProjectorCommand;
    type Inbound = [u8];
    type Key = RequestId;
    type Reply = ProjectorReply;

    fn correlation_key(&self, id: RequestId, _command: &ProjectorCommand) -> RequestId {
        id
    }

    fn encode(&self, command: &ProjectorCommand) -> Vec<u8> {
        command.packet().to_bytes().to_vec()
    }

    fn classify(
        &mut self,
        bytes: &[u8],
        in_flight: Option<&ProjectorCommand>,
    ) -> Classified<RequestId, ProjectorReply> {
        let payload = match Frame::parse(bytes) {
            Frame::Ack => Payload::Ack(true),
            Frame::Nak => Payload::Ack(false),
            Frame::Data(byte1, byte2) => Payload::Data(byte1, byte2),
            Frame::Malformed { tag, len } => {
                tracing::warn!(
                    "Unexpected response length for tag {:#04x}: {} bytes {:02x?}",
                    tag,
                    len,
                    bytes
                );
                return Classified::Malformed;
            }
            Frame::Error(detail) => {
                tracing::warn!("Projector reported error: {:02x?}", detail);
                return Classified::Complete {
                    reply: None,
                    changed: false,
                };
            }
            Frame::AuthError => {
                tracing::warn!("Projector reported an authentication error");
                return Classified::Complete {
                    reply: None,
                    changed: false,
                };
            }
            Frame::Unknown(tag) => {
                tracing::warn!("Unknown response type {:#04x}: {:02x?}", tag, bytes);
                return Classified::Complete {
                    reply: None,
                    changed: false,
                };
            }
            Frame::Empty => return Classified::Ignored,
        };

        let Some(&command) = in_flight else {
            tracing::warn!("Projector response with nothing in flight: {:02x?}", bytes);
            return Classified::Ignored;
        };

        let (reply, changed) = self.decode(command, payload);
        Classified::Complete {
            reply: Some(reply),
            changed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_parse() {
        assert_eq!(Frame::parse(&[0x06]), Frame::Ack);
        assert_eq!(Frame::parse(&[0x15]), Frame::Nak);
        assert_eq!(Frame::parse(&[0x1C, 0x01, 0x02]), Frame::Error([0x01, 0x02]));
        assert_eq!(Frame::parse(&[0x1D, 0x01, 0x00]), Frame::Data(0x01, 0x00));
        assert_eq!(Frame::parse(&[0x1F]), Frame::AuthError);
        assert_eq!(Frame::parse(&[0x42, 0x00]), Frame::Unknown(0x42));
        assert_eq!(Frame::parse(&[]), Frame::Empty);
    }

    #[test]
    fn test_wrong_length_frames_are_malformed() {
        assert_eq!(Frame::parse(&[0x1D, 0x01]), Frame::Malformed { tag: 0x1D, len: 2 });
        assert_eq!(Frame::parse(&[0x1C]), Frame::Malformed { tag: 0x1C, len: 1 });
        assert_eq!(
            Frame::parse(&[0x1D, 0x01, 0x00, 0x00]),
            Frame::Malformed { tag: 0x1D, len: 4 }
        );
    }

    #[test]
    fn test_power_change_reported_once() {
        let mut protocol = ChristieProtocol::new();
        let query = ProjectorCommand::QueryPower;

        assert_eq!(
            protocol.classify(&[0x1D, 0x01, 0x00], Some(&query)),
            Classified::Complete {
                reply: Some(ProjectorReply::Power(PowerState::On)),
                changed: true,
            }
        );
        assert_eq!(
            protocol.classify(&[0x1D, 0x01, 0x00], Some(&query)),
            Classified::Complete {
                reply: Some(ProjectorReply::Power(PowerState::On)),
                changed: false,
            }
        );
        assert_eq!(protocol.state().power, PowerState::On);
    }

    #[test]
    fn test_unknown_status_byte() {
        let mut protocol = ChristieProtocol::new();
        let query = ProjectorCommand::QueryPower;
        protocol.classify(&[0x1D, 0x02, 0x00], Some(&query));
        assert_eq!(protocol.state().power, PowerState::Cooldown);

        protocol.classify(&[0x1D, 0x09, 0x00], Some(&query));
        assert_eq!(protocol.state().power, PowerState::Unknown);
    }

    #[test]
    fn test_set_commands_report_ack() {
        let mut protocol = ChristieProtocol::new();
        assert_eq!(
            protocol.classify(&[0x06], Some(&ProjectorCommand::PowerOn)),
            Classified::Complete {
                reply: Some(ProjectorReply::Accepted(true)),
                changed: false,
            }
        );
        assert_eq!(
            protocol.classify(&[0x15], Some(&ProjectorCommand::PowerOff)),
            Classified::Complete {
                reply: Some(ProjectorReply::Accepted(false)),
                changed: false,
            }
        );
        assert_eq!(protocol.state().power, PowerState::Unknown);
    }

    #[test]
    fn test_malformed_leaves_state_alone() {
        let mut protocol = ChristieProtocol::new();
        let query = ProjectorCommand::QueryPower;
        assert_eq!(protocol.classify(&[0x1D, 0x01], Some(&query)), Classified::Malformed);
        assert_eq!(protocol.classify(&[0x1C, 0x01], Some(&query)), Classified::Malformed);
        assert_eq!(protocol.state().power, PowerState::Unknown);
    }

    #[test]
    fn test_error_and_unknown_tags_settle_without_reply() {
        let mut protocol = ChristieProtocol::new();
        let query = ProjectorCommand::QueryPower;
        for frame in [&[0x1C, 0x00, 0x01][..], &[0x1F][..], &[0x99][..]] {
            assert_eq!(
                protocol.classify(frame, Some(&query)),
                Classified::Complete {
                    reply: None,
                    changed: false,
                }
            );
        }
    }

    #[test]
    fn test_response_without_request_is_ignored() {
        let mut protocol = ChristieProtocol::new();
        assert_eq!(protocol.classify(&[0x1D, 0x01, 0x00], None), Classified::Ignored);
        assert_eq!(protocol.state().power, PowerState::Unknown);
    }
}
