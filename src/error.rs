//! Error types for the CC bridge
//!
//! Transport failures are reported through [`BridgeError`] but never reach the
//! host scheduler: the engine logs them and degrades to "no port" or
//! "no messages this tick".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The platform MIDI layer could not be initialised
    #[error("MIDI system unavailable: {0}")]
    Init(String),

    /// No enumerable device at this index
    #[error("no MIDI device at index {0}")]
    PortNotFound(usize),

    /// The device exists but is an output, so it cannot be opened for reading
    #[error("MIDI device {0} is not an input")]
    NotAnInput(usize),

    /// The driver refused to open the device
    #[error("failed to open MIDI port: {0}")]
    Open(String),

    /// The stream failed while polling
    #[error("failed to read MIDI port: {0}")]
    Read(String),

    /// The driver reported an error while closing the stream
    #[error("failed to close MIDI port: {0}")]
    Close(String),

    /// A configuration value outside its valid range
    #[error("invalid {field}: {value} (expected {expected})")]
    InvalidSetting {
        field: &'static str,
        value: i64,
        expected: &'static str,
    },
}

impl From<midir::InitError> for BridgeError {
    fn from(e: midir::InitError) -> Self {
        BridgeError::Init(e.to_string())
    }
}

impl From<midir::ConnectError<midir::MidiInput>> for BridgeError {
    fn from(e: midir::ConnectError<midir::MidiInput>) -> Self {
        BridgeError::Open(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
