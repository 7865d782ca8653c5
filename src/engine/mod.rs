//! CC mapping engine
//!
//! Owns at most one open MIDI input stream, drains it once per tick through
//! the [`CcTable`], and writes every watched value to its output as a control
//! voltage. Transport failures are logged and degrade the engine to
//! "no port" or "no messages this tick"; they never reach the caller of
//! [`CcEngine::tick`].

mod table;

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::midi::convert::cc_to_cv;
use crate::midi::MidiWord;
use crate::transport::{InputStream, MidiTransport, PortDescriptor, INPUT_QUEUE_DEPTH};

pub use table::{
    CcTable, ChannelFilter, OffsetPolicy, FIRST_CC_MAX, NUM_CHANNELS, NUM_OUTPUTS,
};

/// Upper bound on messages decoded in a single tick
pub const MAX_MESSAGES_PER_TICK: usize = 4 * INPUT_QUEUE_DEPTH;

/// Currently selected MIDI device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortSelection {
    #[default]
    None,
    /// Index into the current device enumeration
    Index(usize),
}

impl PortSelection {
    /// Decode the integer form used by menus: negative means no device
    pub fn from_raw(raw: i64) -> Self {
        usize::try_from(raw).map_or(PortSelection::None, PortSelection::Index)
    }

    pub fn as_raw(self) -> i64 {
        match self {
            PortSelection::None => -1,
            PortSelection::Index(i) => i as i64,
        }
    }

    pub fn index(self) -> Option<usize> {
        match self {
            PortSelection::None => None,
            PortSelection::Index(i) => Some(i),
        }
    }
}

/// Host-managed output slot
///
/// Writes to an unconnected output are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Output {
    pub connected: bool,
    pub voltage: f32,
}

impl Output {
    pub fn connected() -> Self {
        Self {
            connected: true,
            voltage: 0.0,
        }
    }
}

/// MIDI CC to control-voltage engine, one per module instance
pub struct CcEngine {
    transport: Arc<dyn MidiTransport>,
    active_port: PortSelection,
    /// Descriptive name of the open device, captured when it was opened
    active_name: Option<String>,
    stream: Option<Box<dyn InputStream>>,
    table: CcTable,
}

impl CcEngine {
    /// Create an engine with no port open and every value at zero
    pub fn new(transport: Arc<dyn MidiTransport>) -> Self {
        Self::with_offset_policy(transport, OffsetPolicy::default())
    }

    pub fn with_offset_policy(transport: Arc<dyn MidiTransport>, policy: OffsetPolicy) -> Self {
        Self {
            transport,
            active_port: PortSelection::None,
            active_name: None,
            stream: None,
            table: CcTable::new(policy),
        }
    }

    /// All devices the transport can enumerate right now
    ///
    /// The list can change between calls when devices are hot-plugged.
    pub fn list_ports(&self) -> Vec<PortDescriptor> {
        match self.transport.enumerate_ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Failed to enumerate MIDI ports: {}", e);
                Vec::new()
            }
        }
    }

    /// Descriptive name of a device in the current enumeration
    pub fn port_name(&self, selection: PortSelection) -> Option<String> {
        let index = selection.index()?;
        self.list_ports()
            .into_iter()
            .find(|port| port.index == index)
            .map(|port| port.descriptive_name())
    }

    pub fn port(&self) -> PortSelection {
        self.active_port
    }

    /// Descriptive name of the open device
    ///
    /// Unlike [`CcEngine::port_name`] this does not follow the index through
    /// later enumerations, so it keeps naming the open device after other
    /// devices are unplugged.
    pub fn active_port_name(&self) -> Option<&str> {
        self.active_name.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Close any open stream, then open `selection`
    ///
    /// Reselecting the active port closes and reopens it. On failure the
    /// engine is left with no port and the driver's reason is logged and
    /// returned.
    pub fn set_port(&mut self, selection: PortSelection) -> Result<()> {
        self.close_stream();

        let PortSelection::Index(index) = selection else {
            debug!("MIDI port deselected");
            return Ok(());
        };

        let name = self.port_name(selection);

        match self.transport.open_input(index) {
            Ok(stream) => {
                self.stream = Some(stream);
                self.active_port = selection;
                info!(
                    "MIDI port {} opened ({})",
                    index,
                    name.as_deref().unwrap_or("unnamed")
                );
                self.active_name = name;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open MIDI port {}: {}", index, e);
                Err(e)
            }
        }
    }

    fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.close() {
                warn!("Failed to close MIDI port: {}", e);
            }
        }
        self.active_port = PortSelection::None;
        self.active_name = None;
    }

    pub fn channel(&self) -> ChannelFilter {
        self.table.channel()
    }

    /// Takes effect from the next decoded message
    pub fn set_channel(&mut self, channel: ChannelFilter) -> Result<()> {
        self.table.set_channel(channel)
    }

    pub fn first_cc(&self) -> u8 {
        self.table.first_cc()
    }

    /// Takes effect from the next decoded message
    pub fn set_first_cc(&mut self, first_cc: u8) -> Result<()> {
        self.table.set_first_cc(first_cc)
    }

    pub fn offset_policy(&self) -> OffsetPolicy {
        self.table.offset_policy()
    }

    pub fn set_offset_policy(&mut self, policy: OffsetPolicy) {
        self.table.set_offset_policy(policy);
    }

    /// Decode a single message against the current filter and window
    pub fn process_message(&mut self, word: MidiWord) -> bool {
        self.table.process(word)
    }

    /// Most recent value of every watched CC number
    pub fn values(&self) -> &[u8; NUM_OUTPUTS] {
        self.table.values()
    }

    /// Control voltage currently produced by one slot
    pub fn voltage(&self, slot: usize) -> Option<f32> {
        self.table.values().get(slot).map(|&v| cc_to_cv(v))
    }

    /// Advance one processing cycle
    ///
    /// Drains pending input (bounded by [`MAX_MESSAGES_PER_TICK`]) and writes
    /// every connected output. Returns the number of messages decoded.
    pub fn tick(&mut self, outputs: &mut [Output]) -> usize {
        let drained = self.drain_input();

        for (output, &value) in outputs.iter_mut().zip(self.table.values()) {
            if output.connected {
                output.voltage = cc_to_cv(value);
            }
        }

        drained
    }

    fn drain_input(&mut self) -> usize {
        let Some(stream) = self.stream.as_mut() else {
            return 0;
        };

        let mut drained = 0;
        while drained < MAX_MESSAGES_PER_TICK {
            match stream.poll() {
                Ok(Some(word)) => {
                    self.table.process(word);
                    drained += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("MIDI read failed: {}", e);
                    break;
                }
            }
        }
        drained
    }

    /// Close the port and zero every value
    pub fn reset(&mut self) {
        self.close_stream();
        self.table.clear();
    }
}

impl Drop for CcEngine {
    fn drop(&mut self) {
        self.close_stream();
    }
}
