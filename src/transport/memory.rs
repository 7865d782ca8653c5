//! In-memory transport
//!
//! Devices are registered by hand and messages are injected into per-device
//! queues. Open, read and close failures can be scripted to exercise the
//! engine's degraded paths.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::{Direction, InputStream, MidiTransport, PortDescriptor, INPUT_QUEUE_DEPTH};
use crate::error::{BridgeError, Result};
use crate::midi::MidiWord;

#[derive(Debug)]
struct Device {
    interface: String,
    name: String,
    direction: Direction,
}

#[derive(Debug, Default)]
struct MemoryState {
    devices: Vec<Device>,
    /// Pending messages, keyed by device name
    queues: HashMap<String, VecDeque<MidiWord>>,
    open_streams: HashMap<String, usize>,
    open_failures: HashMap<String, String>,
    read_failures: HashMap<String, String>,
    close_failures: HashMap<String, String>,
    opened_total: usize,
    closed_total: usize,
}

/// Scriptable transport living entirely in memory
///
/// Cloning yields another handle onto the same devices.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input device and return its current index
    pub fn add_input(&self, interface: &str, name: &str) -> usize {
        self.add_device(interface, name, Direction::Input)
    }

    /// Register an output device and return its current index
    pub fn add_output(&self, interface: &str, name: &str) -> usize {
        self.add_device(interface, name, Direction::Output)
    }

    fn add_device(&self, interface: &str, name: &str, direction: Direction) -> usize {
        let mut state = self.state.lock();
        state.devices.push(Device {
            interface: interface.to_string(),
            name: name.to_string(),
            direction,
        });
        state.devices.len() - 1
    }

    /// Unplug a device; later devices shift down one index
    pub fn remove_device(&self, name: &str) {
        let mut state = self.state.lock();
        state.devices.retain(|d| d.name != name);
        state.queues.remove(name);
    }

    /// Queue a message on a device, dropping it if the queue is full
    pub fn send(&self, name: &str, word: MidiWord) -> bool {
        let mut state = self.state.lock();
        let queue = state.queues.entry(name.to_string()).or_default();
        if queue.len() >= INPUT_QUEUE_DEPTH {
            return false;
        }
        queue.push_back(word);
        true
    }

    /// Queue a raw byte message; unpackable bytes are ignored
    pub fn send_bytes(&self, name: &str, data: &[u8]) -> bool {
        MidiWord::from_bytes(data).is_some_and(|word| self.send(name, word))
    }

    /// Make every later open of this device fail
    pub fn fail_open(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .open_failures
            .insert(name.to_string(), reason.to_string());
    }

    /// Make the next poll on this device fail
    pub fn fail_next_read(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .read_failures
            .insert(name.to_string(), reason.to_string());
    }

    /// Make the next close of this device fail
    pub fn fail_next_close(&self, name: &str, reason: &str) {
        self.state
            .lock()
            .close_failures
            .insert(name.to_string(), reason.to_string());
    }

    /// Number of streams currently open on a device
    pub fn open_streams(&self, name: &str) -> usize {
        self.state.lock().open_streams.get(name).copied().unwrap_or(0)
    }

    /// Total streams opened and closed over the transport's lifetime
    pub fn open_close_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.opened_total, state.closed_total)
    }

    /// Messages still waiting on a device
    pub fn pending(&self, name: &str) -> usize {
        self.state.lock().queues.get(name).map_or(0, VecDeque::len)
    }
}

impl MidiTransport for MemoryTransport {
    fn enumerate_ports(&self) -> Result<Vec<PortDescriptor>> {
        let state = self.state.lock();
        Ok(state
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| PortDescriptor {
                index,
                interface: device.interface.clone(),
                name: device.name.clone(),
                direction: device.direction,
            })
            .collect())
    }

    fn open_input(&self, index: usize) -> Result<Box<dyn InputStream>> {
        let mut state = self.state.lock();
        let device = state
            .devices
            .get(index)
            .ok_or(BridgeError::PortNotFound(index))?;
        if device.direction != Direction::Input {
            return Err(BridgeError::NotAnInput(index));
        }
        let name = device.name.clone();
        if let Some(reason) = state.open_failures.get(&name) {
            return Err(BridgeError::Open(reason.clone()));
        }

        *state.open_streams.entry(name.clone()).or_default() += 1;
        state.opened_total += 1;

        Ok(Box::new(MemoryStream {
            name,
            state: self.state.clone(),
        }))
    }
}

struct MemoryStream {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl InputStream for MemoryStream {
    fn poll(&mut self) -> Result<Option<MidiWord>> {
        let mut state = self.state.lock();
        if let Some(reason) = state.read_failures.remove(&self.name) {
            return Err(BridgeError::Read(reason));
        }
        Ok(state
            .queues
            .get_mut(&self.name)
            .and_then(VecDeque::pop_front))
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(count) = state.open_streams.get_mut(&self.name) {
            *count = count.saturating_sub(1);
        }
        state.closed_total += 1;
        match state.close_failures.remove(&self.name) {
            Some(reason) => Err(BridgeError::Close(reason)),
            None => Ok(()),
        }
    }
}
