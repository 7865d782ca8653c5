//! CC Bridge - MIDI Control Change to control voltage
//!
//! Receives MIDI CC messages from one input device and republishes the latest
//! value of sixteen consecutive CC numbers as 0-10 V outputs, once per host
//! processing tick.

pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod host;
pub mod midi;
pub mod persistence;
pub mod transport;

pub use control::CcControl;
pub use engine::{CcEngine, ChannelFilter, OffsetPolicy, Output, PortSelection, NUM_OUTPUTS};
pub use error::{BridgeError, Result};
pub use midi::MidiWord;
pub use transport::{MidiSystem, MidiTransport};
