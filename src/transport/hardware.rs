//! Hardware transport backed by midir
//!
//! midir delivers messages on a driver thread through a callback. Each open
//! stream bridges that callback into a bounded crossbeam channel which the
//! tick drains with `try_recv`, so the processing thread never blocks.

use crossbeam::channel::{self, Receiver, TryRecvError};
use midir::{MidiInput, MidiInputConnection, MidiOutput};
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use super::{Direction, InputStream, MidiTransport, PortDescriptor, INPUT_QUEUE_DEPTH};
use crate::error::{BridgeError, Result};
use crate::midi::{format_hex, MidiWord};

const CLIENT_NAME: &str = "CC-Bridge";

#[cfg(target_os = "linux")]
const INTERFACE: &str = "ALSA";
#[cfg(target_os = "macos")]
const INTERFACE: &str = "CoreMIDI";
#[cfg(target_os = "windows")]
const INTERFACE: &str = "MMSystem";
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const INTERFACE: &str = "MIDI";

/// How often an idle stream checks that its device is still enumerated
const PRESENCE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

static MIDI_SYSTEM: OnceCell<Arc<MidirTransport>> = OnceCell::new();

/// Process-wide MIDI subsystem
///
/// Initialised once, on first use, behind a single barrier. Engines receive
/// the resulting handle explicitly instead of touching global state.
pub struct MidiSystem;

impl MidiSystem {
    /// Shared hardware transport, initialising the MIDI layer on first call
    ///
    /// A failed initialisation is not cached; the next call retries.
    pub fn global() -> Result<Arc<dyn MidiTransport>> {
        let transport = MIDI_SYSTEM.get_or_try_init(|| {
            let transport = MidirTransport::new()?;
            info!("MIDI system initialised ({})", INTERFACE);
            Ok::<_, BridgeError>(Arc::new(transport))
        })?;
        let transport: Arc<dyn MidiTransport> = transport.clone();
        Ok(transport)
    }
}

/// midir-based implementation of [`MidiTransport`]
///
/// Holds no driver clients itself; every enumeration and every open stream
/// creates a scoped midir client, so there is nothing to tear down at exit.
#[derive(Debug)]
pub struct MidirTransport {
    _private: (),
}

impl MidirTransport {
    /// Probe the platform MIDI layer
    pub fn new() -> Result<Self> {
        MidiInput::new(CLIENT_NAME)?;
        Ok(Self { _private: () })
    }
}

impl MidiTransport for MidirTransport {
    fn enumerate_ports(&self) -> Result<Vec<PortDescriptor>> {
        let midi_in = MidiInput::new(&format!("{}-Scanner", CLIENT_NAME))?;
        let midi_out = MidiOutput::new(&format!("{}-Scanner", CLIENT_NAME))?;

        let inputs = midi_in
            .ports()
            .into_iter()
            .filter_map(|port| midi_in.port_name(&port).ok())
            .map(|name| (name, Direction::Input));
        let outputs = midi_out
            .ports()
            .into_iter()
            .filter_map(|port| midi_out.port_name(&port).ok())
            .map(|name| (name, Direction::Output));

        Ok(inputs
            .chain(outputs)
            .enumerate()
            .map(|(index, (name, direction))| PortDescriptor {
                index,
                interface: INTERFACE.to_string(),
                name,
                direction,
            })
            .collect())
    }

    fn open_input(&self, index: usize) -> Result<Box<dyn InputStream>> {
        let midi_in = MidiInput::new(CLIENT_NAME)?;
        let ports = midi_in.ports();

        let Some(port) = ports.get(index) else {
            // Outputs are enumerated after inputs
            let output_count = MidiOutput::new(CLIENT_NAME)?.port_count();
            return Err(if index < ports.len() + output_count {
                BridgeError::NotAnInput(index)
            } else {
                BridgeError::PortNotFound(index)
            });
        };

        let port_name = midi_in
            .port_name(port)
            .map_err(|e| BridgeError::Open(e.to_string()))?;

        let (tx, rx) = channel::bounded(INPUT_QUEUE_DEPTH);
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_in_callback = dropped.clone();

        let connection = midi_in.connect(
            port,
            &format!("cc-bridge-{}", index),
            move |_timestamp, data, _| {
                trace!("MIDI RX: {}", format_hex(data));
                if let Some(word) = MidiWord::from_bytes(data) {
                    if tx.try_send(word).is_err() {
                        dropped_in_callback.fetch_add(1, Ordering::Relaxed);
                    }
                }
            },
            (),
        )?;

        debug!("MIDI input opened: '{}'", port_name);

        Ok(Box::new(MidirStream {
            connection: Some(connection),
            rx,
            dropped,
            port_name,
            presence: PresenceCheck::new(PRESENCE_CHECK_INTERVAL, Instant::now()),
        }))
    }
}

/// Rate limit for device presence checks
#[derive(Debug)]
struct PresenceCheck {
    interval: Duration,
    last: Instant,
}

impl PresenceCheck {
    fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last: now,
        }
    }

    /// Whether a check is due at `now`; starts a new interval if so
    fn due(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) < self.interval {
            return false;
        }
        self.last = now;
        true
    }
}

/// Open midir input with its buffered queue
///
/// The queue's sender lives in the midir callback, which is only dropped when
/// the connection closes, so an unplugged device never disconnects the queue.
/// Instead, once per [`PRESENCE_CHECK_INTERVAL`] an empty poll re-enumerates
/// the inputs and reports a read error if the device is gone.
struct MidirStream {
    connection: Option<MidiInputConnection<()>>,
    rx: Receiver<MidiWord>,
    dropped: Arc<AtomicU64>,
    port_name: String,
    presence: PresenceCheck,
}

impl MidirStream {
    fn device_present(&self) -> bool {
        let midi_in = match MidiInput::new(&format!("{}-Scanner", CLIENT_NAME)) {
            Ok(midi_in) => midi_in,
            Err(e) => {
                debug!("Skipping presence check for '{}': {}", self.port_name, e);
                return true;
            }
        };
        midi_in
            .ports()
            .iter()
            .any(|port| midi_in.port_name(port).is_ok_and(|name| name == self.port_name))
    }
}

impl InputStream for MidirStream {
    fn poll(&mut self) -> Result<Option<MidiWord>> {
        let dropped = self.dropped.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            warn!(
                "MIDI input '{}' queue full, dropped {} message(s)",
                self.port_name, dropped
            );
        }

        match self.rx.try_recv() {
            Ok(word) => Ok(Some(word)),
            Err(TryRecvError::Empty) => {
                if self.presence.due(Instant::now()) && !self.device_present() {
                    return Err(BridgeError::Read(format!(
                        "input '{}' is no longer present",
                        self.port_name
                    )));
                }
                Ok(None)
            }
            Err(TryRecvError::Disconnected) => Err(BridgeError::Read(format!(
                "input '{}' disconnected",
                self.port_name
            ))),
        }
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection.close();
            debug!("MIDI input closed: '{}'", self.port_name);
        }
        Ok(())
    }
}
