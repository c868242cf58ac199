use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest native volume the receiver accepts.
pub const MAX_VOLUME: u16 = 800;
/// Lowest native volume.
pub const MIN_VOLUME: u16 = 0;
/// Native step used by the receiver for up/down and absolute values.
pub const VOLUME_STEP: u16 = 5;
/// Native level the "default volume" preset maps to.
pub const DEFAULT_VOLUME_RAW: u16 = 525;

/// Lines containing this marker report the volume ceiling, not the volume.
pub const MAX_VOLUME_MARKER: &str = "MVMAX";

/// Independently observable facets of the receiver's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    Source,
    Volume,
    Mute,
}

impl Property {
    pub const ALL: [Property; 3] = [Property::Volume, Property::Mute, Property::Source];

    /// Two-character prefix used on the wire for this property.
    pub fn prefix(&self) -> &'static str {
        match self {
            Property::Source => "SI",
            Property::Volume => "MV",
            Property::Mute => "MU",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<Property> {
        Self::ALL.into_iter().find(|p| p.prefix() == prefix)
    }

    /// Classify a line or command by its leading two characters.
    pub fn of_line(line: &str) -> Option<Property> {
        line.get(..2).and_then(Self::from_prefix)
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Property::Source => "source",
            Property::Volume => "volume",
            Property::Mute => "mute",
        };
        f.write_str(name)
    }
}

/// Snapshot of the receiver as last confirmed by the device.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiverState {
    /// Selected input, an opaque device token such as "DVD".
    pub input: String,
    /// Volume normalised to [0.0, 1.0].
    pub volume: f64,
    /// Native volume, 0..=800 in steps of 5.
    pub volume_raw: u16,
    pub mute: bool,
}

impl Default for ReceiverState {
    fn default() -> Self {
        Self {
            input: "DVD".to_string(),
            volume: normalize_volume(400),
            volume_raw: 400,
            mute: false,
        }
    }
}

/// A command the receiver understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiverCommand {
    Query(Property),
    SetInput(String),
    SetMute(bool),
    /// Absolute native volume, already a multiple of 5 within range.
    SetVolume(u16),
    VolumeUp,
    VolumeDown,
}

impl ReceiverCommand {
    /// Property whose next report answers this command.
    pub fn property(&self) -> Property {
        match self {
            ReceiverCommand::Query(property) => *property,
            ReceiverCommand::SetInput(_) => Property::Source,
            ReceiverCommand::SetMute(_) => Property::Mute,
            ReceiverCommand::SetVolume(_)
            | ReceiverCommand::VolumeUp
            | ReceiverCommand::VolumeDown => Property::Volume,
        }
    }

    /// ASCII form of the command, without the CR terminator.
    pub fn wire(&self) -> String {
        match self {
            ReceiverCommand::Query(property) => format!("{}?", property.prefix()),
            ReceiverCommand::SetInput(input) => format!("SI{}", input),
            ReceiverCommand::SetMute(true) => "MUON".to_string(),
            ReceiverCommand::SetMute(false) => "MUOFF".to_string(),
            ReceiverCommand::SetVolume(native) => format!("MV{}", volume_suffix(*native)),
            ReceiverCommand::VolumeUp => "MVUP".to_string(),
            ReceiverCommand::VolumeDown => "MVDOWN".to_string(),
        }
    }
}

/// Whether `input` can be sent as the suffix of an `SI` command.
///
/// Input names are printable ASCII with no spaces, so a name can never
/// carry a line terminator and become more than one command.
pub fn is_valid_input(input: &str) -> bool {
    !input.is_empty() && input.bytes().all(|b| b.is_ascii_graphic())
}

/// Map a native volume onto [0.0, 1.0].
pub fn normalize_volume(native: u16) -> f64 {
    let span = f64::from(MAX_VOLUME - MIN_VOLUME);
    ((f64::from(native) - f64::from(MIN_VOLUME)) / span).clamp(0.0, 1.0)
}

/// Map a normalised volume onto the native range.
///
/// Clamps to [0, 800] and rounds down to the native step. Returns `None`
/// for NaN or infinite input.
pub fn native_volume(level: f64) -> Option<u16> {
    if !level.is_finite() {
        return None;
    }

    let span = f64::from(MAX_VOLUME - MIN_VOLUME);
    let scaled = (level * span + f64::from(MIN_VOLUME))
        .clamp(f64::from(MIN_VOLUME), f64::from(MAX_VOLUME));
    let steps = (scaled / f64::from(VOLUME_STEP)).floor() as u16;
    Some(steps * VOLUME_STEP)
}

/// Format a native volume the way the receiver expects it.
///
/// The receiver counts in tenths: whole values are sent as two digits
/// (520 -> "52"), half steps as three (525 -> "525", 55 -> "055").
pub fn volume_suffix(native: u16) -> String {
    if native % 10 == 0 {
        format!("{:02}", native / 10)
    } else {
        format!("{:03}", native)
    }
}

/// Parse the numeric suffix of an `MV` report into a native volume.
///
/// Two-digit values are whole units and get a trailing zero.
pub fn parse_volume(suffix: &str) -> Option<u16> {
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    if suffix.len() == 2 {
        format!("{}0", suffix).parse().ok()
    } else {
        suffix.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixes_are_distinct() {
        for (i, a) in Property::ALL.iter().enumerate() {
            assert_eq!(a.prefix().len(), 2);
            for b in &Property::ALL[i + 1..] {
                assert_ne!(a.prefix(), b.prefix());
            }
            assert_eq!(Property::from_prefix(a.prefix()), Some(*a));
        }
    }

    #[test]
    fn test_of_line() {
        assert_eq!(Property::of_line("SIDVD"), Some(Property::Source));
        assert_eq!(Property::of_line("MUON"), Some(Property::Mute));
        assert_eq!(Property::of_line("MV52"), Some(Property::Volume));
        assert_eq!(Property::of_line("PWON"), None);
        assert_eq!(Property::of_line("M"), None);
    }

    #[test]
    fn test_command_wire_format() {
        assert_eq!(ReceiverCommand::Query(Property::Volume).wire(), "MV?");
        assert_eq!(ReceiverCommand::Query(Property::Mute).wire(), "MU?");
        assert_eq!(ReceiverCommand::Query(Property::Source).wire(), "SI?");
        assert_eq!(ReceiverCommand::SetInput("CD".to_string()).wire(), "SICD");
        assert_eq!(ReceiverCommand::SetMute(true).wire(), "MUON");
        assert_eq!(ReceiverCommand::SetMute(false).wire(), "MUOFF");
        assert_eq!(ReceiverCommand::SetVolume(525).wire(), "MV525");
        assert_eq!(ReceiverCommand::VolumeUp.wire(), "MVUP");
        assert_eq!(ReceiverCommand::VolumeDown.wire(), "MVDOWN");
    }

    #[test]
    fn test_input_validation() {
        assert!(is_valid_input("DVD"));
        assert!(is_valid_input("SAT/CBL"));
        assert!(!is_valid_input(""));
        assert!(!is_valid_input("CD\rMUON"));
        assert!(!is_valid_input("CD\n"));
        assert!(!is_valid_input("TV AUDIO"));
        assert!(!is_valid_input("DVD\u{e9}"));
    }

    #[test]
    fn test_native_volume_rounds_down_and_clamps() {
        assert_eq!(native_volume(0.0), Some(0));
        assert_eq!(native_volume(1.0), Some(800));
        assert_eq!(native_volume(0.65), Some(520));
        assert_eq!(native_volume(0.656), Some(520));
        assert_eq!(native_volume(0.65625), Some(525));
        assert_eq!(native_volume(-0.2), Some(0));
        assert_eq!(native_volume(3.0), Some(800));
        assert_eq!(native_volume(f64::NAN), None);
        assert_eq!(native_volume(f64::INFINITY), None);
    }

    #[test]
    fn test_volume_suffix() {
        assert_eq!(volume_suffix(0), "00");
        assert_eq!(volume_suffix(5), "005");
        assert_eq!(volume_suffix(50), "05");
        assert_eq!(volume_suffix(55), "055");
        assert_eq!(volume_suffix(400), "40");
        assert_eq!(volume_suffix(525), "525");
        assert_eq!(volume_suffix(800), "80");
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume("52"), Some(520));
        assert_eq!(parse_volume("525"), Some(525));
        assert_eq!(parse_volume("055"), Some(55));
        assert_eq!(parse_volume("00"), Some(0));
        assert_eq!(parse_volume(""), None);
        assert_eq!(parse_volume("UP"), None);
        assert_eq!(parse_volume("5x"), None);
    }

    #[test]
    fn test_suffix_round_trips_for_every_step() {
        for step in 0..=(MAX_VOLUME / VOLUME_STEP) {
            let native = step * VOLUME_STEP;
            assert_eq!(parse_volume(&volume_suffix(native)), Some(native));
        }
    }

    #[test]
    fn test_normalized_round_trip_within_one_step() {
        for i in 0..=100 {
            let level = f64::from(i) / 100.0;
            let native = native_volume(level).unwrap();
            let parsed = parse_volume(&volume_suffix(native)).unwrap();
            let back = normalize_volume(parsed);
            assert!((back - f64::from(native) / 800.0).abs() <= 1.0 / 800.0);
            assert!(back <= level + 1e-9);
        }
    }

    #[test]
    fn test_default_state() {
        let state = ReceiverState::default();
        assert_eq!(state.input, "DVD");
        assert_eq!(state.volume_raw, 400);
        assert_eq!(state.volume, 0.5);
        assert!(!state.mute);
    }
}
