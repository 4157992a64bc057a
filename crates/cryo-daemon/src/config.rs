//! Daemon configuration.
//!
//! Loaded from a TOML file with environment-variable overrides under the
//! `CRYO` prefix (`CRYO__MONITOR__SAMPLE_INTERVAL=30s` overrides
//! `[monitor] sample_interval`). Durations use humantime notation.
//!
//! ```toml
//! [instruments]
//! gaussmeter_port = "/dev/ttyUSB0"
//! level_meter_port = "/dev/ttyUSB1"
//! power_supply_port = "/dev/ttyUSB2"
//! liquid_helium_channel = 1
//! liquid_nitrogen_channel = 2
//!
//! [monitor]
//! sample_interval = "10s"
//! task_timeout = "10s"
//! output_directory = "/var/log/cryo"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Serial port assignments and channel wiring.
#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub gaussmeter_port: String,
    pub level_meter_port: String,
    pub power_supply_port: String,
    /// Level meter channel wired to the liquid helium sensor.
    #[serde(default = "default_lhe_channel")]
    pub liquid_helium_channel: u8,
    /// Level meter channel wired to the liquid nitrogen sensor.
    #[serde(default = "default_ln2_channel")]
    pub liquid_nitrogen_channel: u8,
}

fn default_lhe_channel() -> u8 {
    1
}

fn default_ln2_channel() -> u8 {
    2
}

/// Measurement loop settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Time between measurement cycles.
    #[serde(with = "humantime_serde", default = "default_sample_interval")]
    pub sample_interval: Duration,
    /// How long a cycle waits for each report task before substituting
    /// the sentinel value.
    #[serde(with = "humantime_serde", default = "default_task_timeout")]
    pub task_timeout: Duration,
    /// Directory the CSV log is written into.
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_task_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_output_directory() -> PathBuf {
    PathBuf::from(".")
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub instruments: InstrumentConfig,
    pub monitor: MonitorConfig,
}

impl DaemonConfig {
    /// Load configuration from `path`, applying `CRYO`-prefixed
    /// environment overrides on top.
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("CRYO").separator("__"))
            .build()
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        let loaded: DaemonConfig = settings
            .try_deserialize()
            .context("invalid daemon configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Semantic checks beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        let instruments = &self.instruments;
        for channel in [
            instruments.liquid_helium_channel,
            instruments.liquid_nitrogen_channel,
        ] {
            if !cryo_driver_cryomagnetics::CHANNELS.contains(&channel) {
                anyhow::bail!(
                    "level meter channel {} is not one of {:?}",
                    channel,
                    cryo_driver_cryomagnetics::CHANNELS
                );
            }
        }
        if instruments.liquid_helium_channel == instruments.liquid_nitrogen_channel {
            anyhow::bail!(
                "liquid helium and liquid nitrogen cannot share channel {}",
                instruments.liquid_helium_channel
            );
        }
        if self.monitor.sample_interval.is_zero() {
            anyhow::bail!("sample_interval must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_full_config() {
        let file = write_config(
            r#"
            [instruments]
            gaussmeter_port = "/dev/ttyUSB0"
            level_meter_port = "/dev/ttyUSB1"
            power_supply_port = "/dev/ttyUSB2"
            liquid_helium_channel = 1
            liquid_nitrogen_channel = 2

            [monitor]
            sample_interval = "30s"
            task_timeout = "5s"
            output_directory = "/tmp/cryo"
            "#,
        );

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.instruments.gaussmeter_port, "/dev/ttyUSB0");
        assert_eq!(config.monitor.sample_interval, Duration::from_secs(30));
        assert_eq!(config.monitor.output_directory, PathBuf::from("/tmp/cryo"));
    }

    #[test]
    fn defaults_apply() {
        let file = write_config(
            r#"
            [instruments]
            gaussmeter_port = "/dev/ttyUSB0"
            level_meter_port = "/dev/ttyUSB1"
            power_supply_port = "/dev/ttyUSB2"

            [monitor]
            "#,
        );

        let config = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(config.instruments.liquid_helium_channel, 1);
        assert_eq!(config.instruments.liquid_nitrogen_channel, 2);
        assert_eq!(config.monitor.sample_interval, Duration::from_secs(10));
    }

    #[test]
    fn rejects_shared_channel() {
        let file = write_config(
            r#"
            [instruments]
            gaussmeter_port = "/dev/ttyUSB0"
            level_meter_port = "/dev/ttyUSB1"
            power_supply_port = "/dev/ttyUSB2"
            liquid_helium_channel = 2
            liquid_nitrogen_channel = 2

            [monitor]
            "#,
        );

        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("share channel"));
    }

    #[test]
    fn rejects_unknown_channel() {
        let file = write_config(
            r#"
            [instruments]
            gaussmeter_port = "/dev/ttyUSB0"
            level_meter_port = "/dev/ttyUSB1"
            power_supply_port = "/dev/ttyUSB2"
            liquid_helium_channel = 3

            [monitor]
            "#,
        );

        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("not one of"));
    }
}
