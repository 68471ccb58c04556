//! Configuration management for the Avantis bridge
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::avantis::{ChannelType, SyncPlan, DEFAULT_PORT};
use crate::transport::TransportOptions;

pub mod watcher;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    pub console: ConsoleConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Console address and MIDI window
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConsoleConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// 1-based, as shown in the console's MIDI setup page
    #[serde(default = "default_base_midi_channel")]
    pub base_midi_channel: u8,
}

impl ConsoleConfig {
    /// 0-based base channel used on the wire
    pub fn wire_base_channel(&self) -> u8 {
        self.base_midi_channel.saturating_sub(1)
    }
}

/// Socket timing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TransportConfig {
    pub fn options(&self) -> TransportOptions {
        TransportOptions {
            pacing: Duration::from_millis(self.pacing_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }
}

/// What to query from the console after each connect
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub query_names: bool,
    #[serde(default = "default_true")]
    pub query_colors: bool,
    /// Channel families to query; empty means every note-addressed family
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub families: Vec<ChannelType>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            query_names: true,
            query_colors: true,
            families: Vec::new(),
        }
    }
}

impl SyncConfig {
    pub fn plan(&self) -> SyncPlan {
        let mut plan = SyncPlan {
            names: self.query_names,
            colors: self.query_colors,
            ..SyncPlan::default()
        };
        if !self.families.is_empty() {
            plan.families = self.families.clone();
        }
        plan
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

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

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.console.host.trim().is_empty() {
            anyhow::bail!("console.host cannot be empty");
        }
        if self.console.port == 0 {
            anyhow::bail!("console.port cannot be 0");
        }
        if !(1..=12).contains(&self.console.base_midi_channel) {
            anyhow::bail!(
                "console.base_midi_channel {} is invalid (must be 1-12)",
                self.console.base_midi_channel
            );
        }

        if self.transport.reconnect_interval_ms == 0 {
            anyhow::bail!("transport.reconnect_interval_ms must be greater than 0");
        }
        if self.transport.connect_timeout_ms == 0 {
            anyhow::bail!("transport.connect_timeout_ms must be greater than 0");
        }

        if let Some(kind) = self.sync.families.iter().find(|k| !k.is_note_addressed()) {
            anyhow::bail!(
                "sync.families cannot include '{}' (not a channel strip)",
                kind.id()
            );
        }

        Ok(())
    }
}

// Default value functions
fn default_port() -> u16 { DEFAULT_PORT }
fn default_base_midi_channel() -> u8 { 12 }
fn default_pacing_ms() -> u64 { 20 }
fn default_reconnect_interval_ms() -> u64 { 5000 }
fn default_connect_timeout_ms() -> u64 { 3000 }
fn default_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(yaml: &str) -> AppConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_minimal_config_takes_defaults() {
        let config = parse("console:\n  host: 192.168.1.70\n");
        assert_eq!(config.console.port, 51325);
        assert_eq!(config.console.base_midi_channel, 12);
        assert_eq!(config.console.wire_base_channel(), 11);
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(config.sync.plan(), SyncPlan::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_options_conversion() {
        let config = parse(
            "console:\n  host: desk\ntransport:\n  pacing_ms: 5\n  reconnect_interval_ms: 250\n",
        );
        let options = config.transport.options();
        assert_eq!(options.pacing, Duration::from_millis(5));
        assert_eq!(options.reconnect_interval, Duration::from_millis(250));
        assert_eq!(options.connect_timeout, Duration::from_millis(3000));
    }

    #[test]
    fn test_sync_families_narrow_plan() {
        let config = parse(
            "console:\n  host: desk\nsync:\n  query_colors: false\n  families: [input, dca]\n",
        );
        let plan = config.sync.plan();
        assert!(plan.names);
        assert!(!plan.colors);
        assert_eq!(plan.families, vec![ChannelType::Input, ChannelType::Dca]);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = parse("console:\n  host: desk\n");

        config.console.base_midi_channel = 13;
        assert!(config.validate().is_err());
        config.console.base_midi_channel = 0;
        assert!(config.validate().is_err());
        config.console.base_midi_channel = 1;
        assert!(config.validate().is_ok());

        config.console.host = "  ".to_string();
        assert!(config.validate().is_err());
        config.console.host = "desk".to_string();

        config.sync.families = vec![ChannelType::Scene];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scene"));
    }

    #[tokio::test]
    async fn test_save_then_load() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.yaml");
        let path = path.to_string_lossy().to_string();

        let config = parse("console:\n  host: 10.0.0.5\n  base_midi_channel: 3\n");
        config.save(&path).await?;

        let loaded = AppConfig::load(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("bad.yaml");
        std::fs::write(&path, "console:\n  host: desk\n  base_midi_channel: 16\n")?;

        let err = AppConfig::load(&path.to_string_lossy()).await.unwrap_err();
        assert!(err.to_string().contains("base_midi_channel"));
        Ok(())
    }
}
