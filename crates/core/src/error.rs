use thiserror::Error;

/// Errors surfaced to callers of a device orchestrator.
///
/// Protocol-level problems (malformed frames, unknown prefixes) are not
/// represented here: they are logged and dropped inside the channel.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The request was dropped before the device produced a reply for it.
    #[error("request abandoned before the device replied")]
    Abandoned,

    /// A volume target that cannot be mapped onto the device range.
    #[error("invalid volume level: {0}")]
    InvalidVolume(f64),

    /// An input token the device cannot take as a single command.
    #[error("invalid input name: {0:?}")]
    InvalidInput(String),
}

pub type DeviceResult<T> = Result<T, DeviceError>;
