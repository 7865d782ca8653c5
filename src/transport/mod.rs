//! MIDI transport capability
//!
//! The engine never talks to a driver directly. It receives an
//! `Arc<dyn MidiTransport>` that can enumerate devices and open input
//! streams, and polls those streams without blocking.
//!
//! Two backends are provided: [`hardware::MidirTransport`] for real devices
//! and [`memory::MemoryTransport`] for tests, benchmarks and the demo host.

pub mod hardware;
pub mod memory;

use std::fmt;

use crate::error::Result;
use crate::midi::MidiWord;

pub use hardware::{MidiSystem, MidirTransport};
pub use memory::MemoryTransport;

/// Depth of the buffered queue behind every open input stream
pub const INPUT_QUEUE_DEPTH: usize = 128;

/// Whether a device produces or consumes MIDI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// One enumerable MIDI device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// Position in the current enumeration; not stable across hot-plugs
    pub index: usize,
    /// Driver interface (e.g. "ALSA", "CoreMIDI")
    pub interface: String,
    /// Device name as reported by the driver
    pub name: String,
    pub direction: Direction,
}

impl PortDescriptor {
    /// Descriptive name used for display and persistence
    pub fn descriptive_name(&self) -> String {
        self.to_string()
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.interface, self.name, self.direction)
    }
}

/// Platform MIDI layer: device enumeration and opening input streams
pub trait MidiTransport: Send + Sync {
    /// All currently enumerable devices, inputs and outputs alike
    fn enumerate_ports(&self) -> Result<Vec<PortDescriptor>>;

    /// Open the device at `index` for buffered, non-blocking reading
    fn open_input(&self, index: usize) -> Result<Box<dyn InputStream>>;
}

/// An open input stream
///
/// Streams are owned and polled by a single processing thread.
pub trait InputStream {
    /// Next pending message, or `None` when the queue is empty. Never blocks.
    fn poll(&mut self) -> Result<Option<MidiWord>>;

    /// Release the device
    fn close(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptive_name() {
        let port = PortDescriptor {
            index: 0,
            interface: "ALSA".to_string(),
            name: "nanoKONTROL2".to_string(),
            direction: Direction::Input,
        };
        assert_eq!(port.descriptive_name(), "ALSA: nanoKONTROL2 (input)");
        assert!(port.is_input());

        let out = PortDescriptor {
            direction: Direction::Output,
            ..port
        };
        assert_eq!(out.to_string(), "ALSA: nanoKONTROL2 (output)");
    }
}
