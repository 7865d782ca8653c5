//! Stand-in host scheduler
//!
//! Owns one engine and its output slots and ticks it at a fixed cadence.
//! The engine itself stays synchronous; this module only decides when to call
//! it and what to do with configuration changes and shutdown.

use anyhow::Result;
use colored::*;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigWatcher, HostConfig, MidiChange, MidiConfig};
use crate::control::{channel_label, first_cc_label, port_label};
use crate::engine::{CcEngine, Output, PortSelection, NUM_OUTPUTS};
use crate::midi::{MidiWord, DATA_MAX};
use crate::persistence::StateSnapshot;
use crate::transport::{MemoryTransport, PortDescriptor};

/// Input device matching `pattern`
///
/// An exact descriptive name wins; otherwise the first input whose device
/// name contains `pattern`, case-insensitively.
pub fn find_input_port(ports: &[PortDescriptor], pattern: &str) -> Option<usize> {
    if let Some(port) = ports.iter().find(|p| p.descriptive_name() == pattern) {
        return Some(port.index);
    }

    let pattern = pattern.to_lowercase();
    ports
        .iter()
        .filter(|p| p.is_input())
        .find(|p| p.name.to_lowercase().contains(&pattern))
        .map(|p| p.index)
}

/// Engine plus the output slots the host connects to it
pub struct Host {
    engine: CcEngine,
    outputs: [Output; NUM_OUTPUTS],
    last_values: [u8; NUM_OUTPUTS],
    print_outputs: bool,
    ticks: u64,
}

impl Host {
    /// Every output starts connected
    pub fn new(engine: CcEngine, config: &HostConfig) -> Self {
        Self {
            engine,
            outputs: [Output::connected(); NUM_OUTPUTS],
            last_values: [0; NUM_OUTPUTS],
            print_outputs: config.print_outputs,
            ticks: 0,
        }
    }

    pub fn engine(&self) -> &CcEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut CcEngine {
        &mut self.engine
    }

    pub fn outputs(&self) -> &[Output; NUM_OUTPUTS] {
        &self.outputs
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Apply the MIDI section of the configuration
    ///
    /// Every problem is logged and the remaining settings are still applied.
    pub fn apply_midi_config(&mut self, midi: &MidiConfig) {
        self.engine.set_offset_policy(midi.offset_policy);

        if let Err(e) = self.engine.set_channel(midi.channel_filter()) {
            warn!("Ignoring configured channel: {}", e);
        }
        if let Err(e) = self.engine.set_first_cc(midi.first_cc) {
            warn!("Ignoring configured first CC: {}", e);
        }

        if let Some(pattern) = &midi.port {
            self.select_port(pattern);
        }
    }

    /// Apply only the MIDI settings a config reload changed
    ///
    /// The input is reopened only when the configured device changed.
    pub fn apply_midi_change(&mut self, change: &MidiChange) {
        if let Some(policy) = change.offset_policy {
            self.engine.set_offset_policy(policy);
        }
        if let Some(channel) = change.channel {
            if let Err(e) = self.engine.set_channel(channel) {
                warn!("Ignoring reloaded channel: {}", e);
            }
        }
        if let Some(first_cc) = change.first_cc {
            if let Err(e) = self.engine.set_first_cc(first_cc) {
                warn!("Ignoring reloaded first CC: {}", e);
            }
        }
        match &change.port {
            Some(Some(pattern)) => self.select_port(pattern),
            Some(None) => {
                let _ = self.engine.set_port(PortSelection::None);
            }
            None => {}
        }
    }

    fn select_port(&mut self, pattern: &str) {
        let ports = self.engine.list_ports();
        match find_input_port(&ports, pattern) {
            Some(index) => {
                // Failures are logged by the engine
                let _ = self.engine.set_port(PortSelection::Index(index));
            }
            None => {
                warn!("No MIDI input matching '{}'", pattern);
                let _ = self.engine.set_port(PortSelection::None);
            }
        }
    }

    /// Run one processing cycle; returns whether any watched value changed
    pub fn tick(&mut self) -> bool {
        let drained = self.engine.tick(&mut self.outputs);
        self.ticks += 1;

        let values = *self.engine.values();
        let changed = values != self.last_values;
        self.last_values = values;

        if drained > 0 {
            debug!("Tick {}: decoded {} message(s)", self.ticks, drained);
        }
        if changed && self.print_outputs {
            println!("{}", self.render_outputs());
        }
        changed
    }

    /// One line per group of four outputs
    pub fn render_outputs(&self) -> String {
        let header = format!(
            "{} {}  {} {}  {} {}",
            "port".dimmed(),
            port_label(&self.engine).bright_white(),
            "ch".dimmed(),
            channel_label(&self.engine).bright_white(),
            "first".dimmed(),
            first_cc_label(&self.engine).bright_white(),
        );

        let first_cc = self.engine.first_cc() as usize;
        let rows = self.outputs.chunks(4).enumerate().map(|(row, chunk)| {
            chunk
                .iter()
                .enumerate()
                .map(|(col, output)| {
                    let slot = row * 4 + col;
                    let voltage = format!("{:6.3}V", output.voltage);
                    let voltage = if output.voltage > 0.0 {
                        voltage.bright_green()
                    } else {
                        voltage.dimmed()
                    };
                    format!("{:>3}:{}", first_cc + slot, voltage)
                })
                .collect::<Vec<_>>()
                .join("  ")
        });

        std::iter::once(header)
            .chain(rows)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Save the engine settings if a state file is configured
    pub async fn save_state(&self, state_file: Option<&str>) -> Result<()> {
        if let Some(path) = state_file {
            StateSnapshot::capture(&self.engine).save_to_file(path).await?;
            info!("Settings saved to {}", path);
        }
        Ok(())
    }
}

/// Tick `host` at `tick_hz` until `shutdown` resolves
///
/// Configuration reloads from `watcher` are applied between ticks.
pub async fn run(
    host: &mut Host,
    tick_hz: u32,
    mut watcher: Option<ConfigWatcher>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let period = Duration::from_secs_f64(1.0 / tick_hz.max(1) as f64);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    info!("Ticking at {} Hz", tick_hz);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                host.tick();
            }

            Some(change) = next_change(&mut watcher) => {
                info!("📝 Applying reloaded MIDI settings: {}", change);
                host.apply_midi_change(&change);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping tick loop");
                break;
            }
        }
    }

    Ok(())
}

async fn next_change(watcher: &mut Option<ConfigWatcher>) -> Option<MidiChange> {
    match watcher {
        Some(watcher) => watcher.next_change().await,
        None => std::future::pending().await,
    }
}

/// Name of the device registered by [`demo_transport`]
pub const DEMO_DEVICE: &str = "Demo Controller";

/// In-memory transport with a single demo input device
pub fn demo_transport() -> MemoryTransport {
    let transport = MemoryTransport::new();
    transport.add_input("Memory", DEMO_DEVICE);
    transport
}

/// Feed slowly sweeping CC values into the demo device
pub fn spawn_demo_feed(transport: MemoryTransport, first_cc: u8, channel: u8) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(50));
        let mut step: u32 = 0;
        loop {
            interval.tick().await;
            for word in demo_sweep(step, first_cc, channel) {
                transport.send(DEMO_DEVICE, word);
            }
            step = step.wrapping_add(4);
        }
    })
}

/// One frame of the demo sweep
///
/// Each of the 16 controllers starting at `first_cc` moves as a triangle wave
/// with its own phase. Controllers past CC 127 are skipped.
pub fn demo_sweep(step: u32, first_cc: u8, channel: u8) -> impl Iterator<Item = MidiWord> {
    (0..NUM_OUTPUTS as u32).filter_map(move |slot| {
        let cc = u8::try_from(first_cc as u32 + slot)
            .ok()
            .filter(|&cc| cc <= DATA_MAX)?;
        let phase = (step + slot * 16) % 254;
        let value = (if phase < 127 { phase } else { 254 - phase }) as u8;
        Some(MidiWord::control_change(channel, cc, value))
    })
}
