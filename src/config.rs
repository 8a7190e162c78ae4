use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FlowError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub emitter: EmitterConfig,

    #[serde(default)]
    pub stats: StatsConfig,
}

/// Where packet timestamps come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TimestampSource {
    /// The pcap header timestamp.
    Capture,
    /// Wall clock when the sniffer thread receives the packet.
    Arrival,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One `name: value` line per feature.
    Text,
    /// One JSON object per record.
    Json,
    /// One dashboard event per record.
    Dashboard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Live device to sniff on. Defaults to the pcap default device.
    pub interface: Option<String>,
    /// Offline capture file to replay instead of a live device.
    pub file: Option<PathBuf>,
    /// BPF filter; empty captures everything.
    pub filter: String,
    pub promisc: bool,
    pub snaplen: i32,
    /// Read timeout in milliseconds
    pub timeout_ms: i32,
    pub timestamps: TimestampSource,
    /// Bound of the sniffer -> engine queue; unbounded when unset.
    pub channel_capacity: Option<usize>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: None,
            file: None,
            filter: String::new(),
            promisc: true,
            snaplen: 65535,
            timeout_ms: 10,
            timestamps: TimestampSource::Capture,
            channel_capacity: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Keep every packet length and timestamp per flow, not just the running aggregates.
    pub retain_samples: bool,
    /// Evict flows idle for longer than this many seconds. Unset keeps flows forever.
    pub idle_timeout_secs: Option<u64>,
    /// How often the idle sweep runs (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            retain_samples: false,
            idle_timeout_secs: None,
            sweep_interval_secs: 1,
        }
    }
}

impl TrackerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterConfig {
    pub format: OutputFormat,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self { format: OutputFormat::Json }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Traffic stats sampling interval (seconds)
    pub interval_secs: u64,
    /// Minimum delay between two published stats lines (milliseconds)
    pub publish_interval_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            publish_interval_ms: 5000,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load config from default locations or fall back to defaults
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("flowlens.toml"),
            PathBuf::from("/etc/flowlens/config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    pub fn validate(&self) -> std::result::Result<(), FlowError> {
        if self.capture.interface.is_some() && self.capture.file.is_some() {
            return Err(FlowError::Config("capture.interface and capture.file are mutually exclusive".into()));
        }
        if self.capture.snaplen <= 0 {
            return Err(FlowError::Config("capture.snaplen must be positive".into()));
        }
        if self.capture.channel_capacity == Some(0) {
            return Err(FlowError::Config("capture.channel_capacity must be at least 1".into()));
        }
        if self.tracker.idle_timeout_secs == Some(0) {
            return Err(FlowError::Config("tracker.idle_timeout_secs must be greater than 0".into()));
        }
        if self.tracker.sweep_interval_secs == 0 {
            return Err(FlowError::Config("tracker.sweep_interval_secs must be greater than 0".into()));
        }
        if self.stats.interval_secs == 0 {
            return Err(FlowError::Config("stats.interval_secs must be greater than 0".into()));
        }
        if self.stats.publish_interval_ms == 0 {
            return Err(FlowError::Config("stats.publish_interval_ms must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.capture.promisc);
        assert_eq!(config.capture.timestamps, TimestampSource::Capture);
        assert!(config.tracker.idle_timeout().is_none());
        assert_eq!(config.emitter.format, OutputFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.capture.snaplen, config.capture.snaplen);
        assert_eq!(parsed.emitter.format, config.emitter.format);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nfile = \"trace.pcap\"\ntimestamps = \"arrival\"\n\n[tracker]\nidle_timeout_secs = 120\n\n[emitter]\nformat = \"dashboard\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.capture.file, Some(PathBuf::from("trace.pcap")));
        assert_eq!(config.capture.timestamps, TimestampSource::Arrival);
        assert_eq!(config.capture.snaplen, 65535);
        assert_eq!(config.tracker.idle_timeout(), Some(Duration::from_secs(120)));
        assert_eq!(config.emitter.format, OutputFormat::Dashboard);
        assert_eq!(config.stats.interval_secs, 1);
    }

    #[test]
    fn test_rejects_zero_idle_timeout() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[tracker]\nidle_timeout_secs = 0").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_rejects_zero_publish_interval() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[stats]\npublish_interval_ms = 0").unwrap();
        assert!(Config::load(file.path()).is_err());

        let mut config = Config::default();
        config.stats.publish_interval_ms = 0;
        assert!(matches!(config.validate(), Err(FlowError::Config(_))));
    }

    #[test]
    fn test_rejects_interface_and_file() {
        let mut config = Config::default();
        config.capture.interface = Some("eth0".into());
        config.capture.file = Some(PathBuf::from("trace.pcap"));
        assert!(matches!(config.validate(), Err(FlowError::Config(_))));
    }
}
