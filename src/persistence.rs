//! Settings export/import and JSON snapshots
//!
//! The selected device is stored by descriptive name, never by index, because
//! enumeration order changes between sessions. On import the name is resolved
//! against the devices present at that moment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tokio::fs;
use tracing::{debug, warn};

use crate::control::CcControl;
use crate::engine::{ChannelFilter, PortSelection};

/// Persisted engine settings
///
/// All keys are optional on import; missing keys leave the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    #[serde(rename = "portName", default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    /// -1 for all channels, otherwise 0-15
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<i64>,
    #[serde(rename = "firstCC", default, skip_serializing_if = "Option::is_none")]
    pub first_cc: Option<i64>,
}

impl EngineState {
    /// Read a record key by key, ignoring keys of the wrong type
    pub fn from_value(value: &Value) -> Self {
        Self {
            port_name: value
                .get("portName")
                .and_then(Value::as_str)
                .map(str::to_string),
            channel: value.get("channel").and_then(Value::as_i64),
            first_cc: value.get("firstCC").and_then(Value::as_i64),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    pub fn is_empty(&self) -> bool {
        self.port_name.is_none() && self.channel.is_none() && self.first_cc.is_none()
    }
}

/// Current settings; empty unless a port is selected
pub fn export_state(control: &dyn CcControl) -> EngineState {
    let Some(port_name) = control.active_port_name() else {
        return EngineState::default();
    };

    EngineState {
        port_name: Some(port_name),
        channel: Some(control.channel().as_raw()),
        first_cc: Some(control.first_cc() as i64),
    }
}

/// Restore settings: device by name, then channel, then first CC
///
/// A device name that no longer resolves selects no device. Out-of-range
/// channel or offset values are skipped with a warning.
pub fn import_state(control: &mut dyn CcControl, state: &EngineState) {
    if let Some(port_name) = &state.port_name {
        let found = control
            .list_ports()
            .into_iter()
            .find(|port| port.descriptive_name() == *port_name);

        let selection = match found {
            Some(port) => {
                debug!("Resolved '{}' to MIDI port {}", port_name, port.index);
                PortSelection::Index(port.index)
            }
            None => {
                warn!("Saved MIDI port '{}' not present, selecting no device", port_name);
                PortSelection::None
            }
        };
        // Open failures are logged by the engine and leave no device selected
        let _ = control.set_port(selection);
    }

    if let Some(raw) = state.channel {
        match ChannelFilter::from_raw(raw).and_then(|channel| control.set_channel(channel)) {
            Ok(()) => {}
            Err(e) => warn!("Ignoring saved channel: {}", e),
        }
    }

    if let Some(raw) = state.first_cc {
        let applied = u8::try_from(raw)
            .ok()
            .map(|first_cc| control.set_first_cc(first_cc));
        match applied {
            Some(Ok(())) => {}
            Some(Err(e)) => warn!("Ignoring saved first CC: {}", e),
            None => warn!("Ignoring saved first CC: {} out of range", raw),
        }
    }
}

/// Settings snapshot written to disk by the host
#[derive(Debug, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Format version
    pub version: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
    pub state: EngineState,
}

impl StateSnapshot {
    pub const VERSION: &'static str = "1.0.0";

    pub fn capture(control: &dyn CcControl) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
            state: export_state(control),
        }
    }

    pub fn restore(&self, control: &mut dyn CcControl) {
        import_state(control, &self.state);
    }

    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize state snapshot")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write state snapshot: {}", path.display()))?;

        debug!("State snapshot saved to: {}", path.display());
        Ok(())
    }

    /// Load a snapshot, reading the settings record tolerantly
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read state snapshot: {}", path.display()))?;

        let root: Value =
            serde_json::from_str(&json).context("Failed to parse state snapshot JSON")?;

        let snapshot = Self {
            version: root
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or(Self::VERSION)
                .to_string(),
            timestamp: root.get("timestamp").and_then(Value::as_u64).unwrap_or(0),
            state: root
                .get("state")
                .map(EngineState::from_value)
                .unwrap_or_default(),
        };

        debug!(
            "State snapshot loaded (version: {}, timestamp: {})",
            snapshot.version, snapshot.timestamp
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CcEngine;
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::NamedTempFile;

    fn engine_on(transport: &MemoryTransport) -> CcEngine {
        CcEngine::new(Arc::new(transport.clone()))
    }

    #[test]
    fn test_export_without_port_is_empty() {
        let transport = MemoryTransport::new();
        let mut engine = engine_on(&transport);
        engine.set_first_cc(30).unwrap();

        let state = export_state(&engine);
        assert!(state.is_empty());
        assert_eq!(state.to_value(), json!({}));
    }

    #[test]
    fn test_export_keys() {
        let transport = MemoryTransport::new();
        transport.add_input("ALSA", "Faders");
        let mut engine = engine_on(&transport);
        engine.set_port(PortSelection::Index(0)).unwrap();
        engine.set_channel(ChannelFilter::Channel(3)).unwrap();
        engine.set_first_cc(20).unwrap();

        assert_eq!(
            export_state(&engine).to_value(),
            json!({
                "portName": "ALSA: Faders (input)",
                "channel": 3,
                "firstCC": 20,
            })
        );
    }

    #[test]
    fn test_export_names_open_device_after_unplug() {
        let transport = MemoryTransport::new();
        transport.add_input("ALSA", "Keys");
        transport.add_input("ALSA", "Faders");
        transport.add_input("ALSA", "Pads");
        let mut engine = engine_on(&transport);
        engine.set_port(PortSelection::Index(1)).unwrap();
        engine.set_first_cc(10).unwrap();

        // "Pads" now sits at index 1, "Faders" at index 0
        transport.remove_device("Keys");
        let state = export_state(&engine);
        assert!(engine.is_open());
        assert_eq!(state.port_name.as_deref(), Some("ALSA: Faders (input)"));
        assert_eq!(state.first_cc, Some(10));

        // Index past the end of the list: still exported by name
        transport.remove_device("Pads");
        transport.remove_device("Faders");
        let state = export_state(&engine);
        assert_eq!(state.port_name.as_deref(), Some("ALSA: Faders (input)"));
        assert_eq!(state.channel, Some(-1));
    }

    #[test]
    fn test_round_trip_survives_reordering() {
        let transport = MemoryTransport::new();
        transport.add_input("ALSA", "Keys");
        transport.add_input("ALSA", "Faders");
        let mut engine = engine_on(&transport);
        engine.set_port(PortSelection::Index(1)).unwrap();
        engine.set_channel(ChannelFilter::All).unwrap();
        engine.set_first_cc(70).unwrap();
        let saved = export_state(&engine);
        drop(engine);

        // Next session: "Keys" is gone, so "Faders" moves to index 0
        transport.remove_device("Keys");
        let mut restored = engine_on(&transport);
        import_state(&mut restored, &saved);

        assert_eq!(restored.port(), PortSelection::Index(0));
        assert_eq!(restored.channel(), ChannelFilter::All);
        assert_eq!(restored.first_cc(), 70);
        assert_eq!(export_state(&restored), saved);
    }

    #[test]
    fn test_missing_device_selects_none() {
        let transport = MemoryTransport::new();
        transport.add_input("ALSA", "Keys");
        let mut engine = engine_on(&transport);
        engine.set_port(PortSelection::Index(0)).unwrap();

        let state = EngineState {
            port_name: Some("ALSA: Unplugged (input)".to_string()),
            channel: Some(5),
            first_cc: Some(10),
        };
        import_state(&mut engine, &state);

        assert_eq!(engine.port(), PortSelection::None);
        assert_eq!(engine.channel(), ChannelFilter::Channel(5));
        assert_eq!(engine.first_cc(), 10);
    }

    #[test]
    fn test_partial_record_keeps_other_fields() {
        let transport = MemoryTransport::new();
        let mut engine = engine_on(&transport);
        engine.set_channel(ChannelFilter::Channel(2)).unwrap();
        engine.set_first_cc(40).unwrap();

        let state = EngineState::from_value(&json!({ "firstCC": 50, "extra": true }));
        import_state(&mut engine, &state);

        assert_eq!(engine.channel(), ChannelFilter::Channel(2));
        assert_eq!(engine.first_cc(), 50);
    }

    #[test]
    fn test_invalid_values_are_skipped() {
        let transport = MemoryTransport::new();
        let mut engine = engine_on(&transport);
        engine.set_first_cc(10).unwrap();

        let state = EngineState::from_value(&json!({
            "portName": 7,
            "channel": 99,
            "firstCC": 300,
        }));
        assert_eq!(state.port_name, None);
        import_state(&mut engine, &state);

        assert_eq!(engine.channel(), ChannelFilter::All);
        assert_eq!(engine.first_cc(), 10);
    }

    #[tokio::test]
    async fn test_snapshot_save_load() {
        let transport = MemoryTransport::new();
        transport.add_input("ALSA", "Faders");
        let mut engine = engine_on(&transport);
        engine.set_port(PortSelection::Index(0)).unwrap();
        engine.set_channel(ChannelFilter::Channel(9)).unwrap();

        let temp_file = NamedTempFile::new().unwrap();
        StateSnapshot::capture(&engine)
            .save_to_file(temp_file.path())
            .await
            .unwrap();

        let loaded = StateSnapshot::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(loaded.version, StateSnapshot::VERSION);

        let mut restored = engine_on(&transport);
        loaded.restore(&mut restored);
        assert_eq!(restored.port(), PortSelection::Index(0));
        assert_eq!(restored.channel(), ChannelFilter::Channel(9));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = StateSnapshot::load_from_file(dir.path().join("missing.json")).await;
        assert!(result.is_err());
    }
}
