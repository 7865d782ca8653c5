//! Hot reload of the MIDI settings
//!
//! The watcher keeps the MIDI section it last reported. Each time the file is
//! modified it re-reads it, diffs the new MIDI section against that baseline
//! and hands the host only the settings that actually moved. Edits that leave
//! the MIDI section alone (or an editor saving the same bytes twice) produce
//! nothing.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{BridgeConfig, MidiConfig};
use crate::engine::{ChannelFilter, OffsetPolicy};

/// Settle time between a modify event and re-reading the file
const RELOAD_DELAY: Duration = Duration::from_millis(100);

/// Pending changes buffered for the host loop
const CHANGE_QUEUE_DEPTH: usize = 8;

/// MIDI settings that differ between two configurations
///
/// `None` means unchanged. For `port`, `Some(None)` means the device was
/// removed from the file and the input should be closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MidiChange {
    pub port: Option<Option<String>>,
    pub channel: Option<ChannelFilter>,
    pub first_cc: Option<u8>,
    pub offset_policy: Option<OffsetPolicy>,
}

impl MidiChange {
    pub fn between(old: &MidiConfig, new: &MidiConfig) -> Self {
        let (old_channel, new_channel) = (old.channel_filter(), new.channel_filter());
        Self {
            port: (old.port != new.port).then(|| new.port.clone()),
            channel: (old_channel != new_channel).then_some(new_channel),
            first_cc: (old.first_cc != new.first_cc).then_some(new.first_cc),
            offset_policy: (old.offset_policy != new.offset_policy).then_some(new.offset_policy),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for MidiChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(port) = &self.port {
            parts.push(format!("port={}", port.as_deref().unwrap_or("none")));
        }
        if let Some(channel) = self.channel {
            parts.push(match channel {
                ChannelFilter::All => "channel=all".to_string(),
                ChannelFilter::Channel(c) => format!("channel={}", c + 1),
            });
        }
        if let Some(first_cc) = self.first_cc {
            parts.push(format!("first_cc={}", first_cc));
        }
        if let Some(policy) = self.offset_policy {
            parts.push(format!("offset_policy={:?}", policy));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Watches the config file and yields [`MidiChange`]s
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    changes: mpsc::Receiver<MidiChange>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    ///
    /// Returns the watcher together with the initially loaded configuration,
    /// whose MIDI section is the baseline for the first diff.
    pub async fn new(config_path: String) -> Result<(Self, BridgeConfig)> {
        let initial = BridgeConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;

        let (tx, changes) = mpsc::channel(CHANGE_QUEUE_DEPTH);
        let baseline = Arc::new(Mutex::new(initial.midi.clone()));

        // notify calls back on its own thread, outside the runtime
        let runtime = tokio::runtime::Handle::current();
        let path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_)) => {
                    debug!("Config file modified: {:?}", event.paths);
                    runtime.spawn(reload(path.clone(), baseline.clone(), tx.clone()));
                }
                Ok(_) => {}
                Err(e) => warn!("Config watch error: {}", e),
            }
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Watching {} for MIDI setting changes", config_path);

        Ok((
            Self {
                _watcher: watcher,
                changes,
            },
            initial,
        ))
    }

    /// Next non-empty change, or `None` once the watcher is gone
    pub async fn next_change(&mut self) -> Option<MidiChange> {
        self.changes.recv().await
    }
}

async fn reload(path: String, baseline: Arc<Mutex<MidiConfig>>, tx: mpsc::Sender<MidiChange>) {
    tokio::time::sleep(RELOAD_DELAY).await;

    let config = match BridgeConfig::load(&path).await {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring config change, keeping current settings: {:#}", e);
            return;
        }
    };

    let change = {
        let mut baseline = baseline.lock();
        let change = MidiChange::between(&baseline, &config.midi);
        *baseline = config.midi;
        change
    };

    if change.is_empty() {
        debug!("Config reloaded, MIDI settings unchanged");
        return;
    }

    info!("MIDI settings changed: {}", change);
    if tx.send(change).await.is_err() {
        debug!("Host loop stopped, dropping MIDI change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn midi(port: Option<&str>, channel: Option<u8>, first_cc: u8) -> MidiConfig {
        MidiConfig {
            port: port.map(str::to_string),
            channel,
            first_cc,
            ..MidiConfig::default()
        }
    }

    #[test]
    fn test_change_lists_only_moved_settings() {
        let old = midi(Some("Faders"), Some(1), 0);

        assert!(MidiChange::between(&old, &old).is_empty());

        let change = MidiChange::between(&old, &midi(Some("Faders"), None, 20));
        assert_eq!(
            change,
            MidiChange {
                channel: Some(ChannelFilter::All),
                first_cc: Some(20),
                ..MidiChange::default()
            }
        );
        assert_eq!(change.to_string(), "channel=all, first_cc=20");
    }

    #[test]
    fn test_removed_port_closes_input() {
        let change = MidiChange::between(&midi(Some("Faders"), None, 0), &midi(None, None, 0));
        assert_eq!(change.port, Some(None));
        assert_eq!(change.to_string(), "port=none");
    }

    #[tokio::test]
    async fn test_watcher_reports_midi_changes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("cc-bridge.yaml");
        fs::write(&config_path, "midi:\n  channel: 1\n  first_cc: 0\n")?;

        let (mut watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.midi.channel, Some(1));

        // Host-only edit: nothing to report
        tokio::time::sleep(Duration::from_millis(50)).await;
        fs::write(
            &config_path,
            "midi:\n  channel: 1\n  first_cc: 0\nhost:\n  tick_hz: 500\n",
        )?;
        tokio::time::sleep(Duration::from_millis(300)).await;

        fs::write(&config_path, "midi:\n  channel: 5\n  first_cc: 40\n")?;

        let change = tokio::time::timeout(Duration::from_secs(2), watcher.next_change())
            .await?
            .expect("watcher closed before reporting a change");

        assert_eq!(change.channel, Some(ChannelFilter::Channel(4)));
        assert_eq!(change.first_cc, Some(40));
        assert_eq!(change.port, None);
        assert_eq!(change.offset_policy, None);
        Ok(())
    }
}
