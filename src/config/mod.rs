//! Configuration management for the CC bridge host
//!
//! Handles loading, validating and hot-reloading the YAML configuration file.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::engine::{ChannelFilter, OffsetPolicy, FIRST_CC_MAX};

pub use watcher::{ConfigWatcher, MidiChange};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub host: HostConfig,
}

/// MIDI input and mapping configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Input device: exact descriptive name or case-insensitive substring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// MIDI channel (1-16); omitted means all channels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<u8>,
    #[serde(default)]
    pub first_cc: u8,
    #[serde(default)]
    pub offset_policy: OffsetPolicy,
}

/// Host scheduler configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HostConfig {
    /// Processing ticks per second
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Where the engine settings are saved on shutdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_file: Option<String>,
    /// Print the output table whenever a voltage changes
    #[serde(default = "default_true")]
    pub print_outputs: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            state_file: None,
            print_outputs: true,
        }
    }
}

impl MidiConfig {
    /// Channel filter as the engine expects it (zero-based)
    pub fn channel_filter(&self) -> ChannelFilter {
        match self.channel {
            Some(c) => ChannelFilter::Channel(c.saturating_sub(1)),
            None => ChannelFilter::All,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate YAML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: BridgeConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if let Some(port) = &self.midi.port {
            if port.trim().is_empty() {
                anyhow::bail!("MIDI port cannot be empty (omit it to select no device)");
            }
        }

        if let Some(channel) = self.midi.channel {
            if channel == 0 || channel > 16 {
                anyhow::bail!("Invalid MIDI channel {} (must be 1-16)", channel);
            }
        }

        if self.midi.first_cc > FIRST_CC_MAX {
            anyhow::bail!(
                "Invalid first_cc {} (must be 0-{})",
                self.midi.first_cc,
                FIRST_CC_MAX
            );
        }

        if self.host.tick_hz == 0 || self.host.tick_hz > 48_000 {
            anyhow::bail!("Invalid tick_hz {} (must be 1-48000)", self.host.tick_hz);
        }

        Ok(())
    }
}

// Default value functions
fn default_tick_hz() -> u32 { 1000 }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let config = BridgeConfig::parse(
            r#"
midi:
  port: "nanoKONTROL"
  channel: 2
  first_cc: 20
  offset_policy: clear
host:
  tick_hz: 500
  state_file: "state.json"
  print_outputs: false
"#,
        )
        .unwrap();

        assert_eq!(config.midi.port.as_deref(), Some("nanoKONTROL"));
        assert_eq!(config.midi.channel_filter(), ChannelFilter::Channel(1));
        assert_eq!(config.midi.first_cc, 20);
        assert_eq!(config.midi.offset_policy, OffsetPolicy::Clear);
        assert_eq!(config.host.tick_hz, 500);
        assert_eq!(config.host.state_file.as_deref(), Some("state.json"));
        assert!(!config.host.print_outputs);
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::parse("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.midi.channel_filter(), ChannelFilter::All);
        assert_eq!(config.midi.offset_policy, OffsetPolicy::KeepStale);
        assert_eq!(config.host.tick_hz, 1000);
        assert!(config.host.print_outputs);
    }

    #[test]
    fn test_validation() {
        assert!(BridgeConfig::parse("midi:\n  channel: 0\n").is_err());
        assert!(BridgeConfig::parse("midi:\n  channel: 17\n").is_err());
        assert!(BridgeConfig::parse("midi:\n  first_cc: 127\n").is_err());
        assert!(BridgeConfig::parse("midi:\n  port: \"  \"\n").is_err());
        assert!(BridgeConfig::parse("host:\n  tick_hz: 0\n").is_err());
        assert!(BridgeConfig::parse("midi:\n  channel: 16\n  first_cc: 126\n").is_ok());
    }

    #[tokio::test]
    async fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path = path.to_string_lossy().to_string();

        let mut config = BridgeConfig::default();
        config.midi.port = Some("Faders".to_string());
        config.midi.channel = Some(10);
        config.save(&path).await.unwrap();

        let loaded = BridgeConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }
}
