//! Cryomagnetics LM-510 liquid cryogen level monitor driver.
//!
//! Protocol overview:
//! - Format: ASCII commands with echo-based framing (see [`crate::protocol`])
//! - Baud: 9600, 8N1, no flow control
//! - Commands write `\r`; echo and answer segments end `\r\n`
//! - Queries: `CHAN?`, `*STB?`, `MEAS? <n>`
//! - Settings: `CHAN <n>`, `MEAS <n>` (starts a measurement, no answer)
//!
//! The meter has two measurement channels (liquid helium on 1, liquid
//! nitrogen on 2 in the usual wiring). A measurement is a two-step
//! exchange: `MEAS <n>` starts it, and after the instrument's settling
//! time `MEAS? <n>` reads the result, e.g. `"15.0 cm"`. A dedicated lock
//! spans the pair so concurrent callers cannot interleave a measurement
//! start with another channel's readout.
//!
//! The status byte (`*STB?`) is a bitfield: bit *n − 1* set means channel
//! *n* has fresh data, so `0b0000_0101` reports channel 1 ready and
//! channel 2 not.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cryo_core::capabilities::LevelSensor;
use cryo_core::error::{CryoError, CryoResult};
use cryo_core::quantity::{parse_quantity, Quantity};
use cryo_core::serial::{wrap_shared, SharedPort};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::protocol::{Framing, QueryEngine};

/// Channels present on the LM-510.
pub const CHANNELS: [u8; 2] = [1, 2];

/// Configuration for the LM-510 driver.
#[derive(Debug, Clone, Deserialize)]
pub struct Lm510Config {
    /// Serial port path (e.g., "/dev/ttyUSB1")
    pub port: String,
    /// Baud rate (default 9600)
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    9600
}

/// Decoded `*STB?` status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusByte(pub u8);

impl StatusByte {
    /// Whether the given channel has data ready. Channel n maps to bit
    /// n − 1, LSB first.
    pub fn channel_ready(&self, channel: u8) -> CryoResult<bool> {
        validate_channel(channel)?;
        Ok(self.0 & (1 << (channel - 1)) != 0)
    }
}

fn validate_channel(channel: u8) -> CryoResult<()> {
    if CHANNELS.contains(&channel) {
        Ok(())
    } else {
        Err(CryoError::InvalidChannel {
            channel,
            allowed: &CHANNELS,
        })
    }
}

/// Driver for the Cryomagnetics LM-510 level monitor.
pub struct Lm510 {
    engine: QueryEngine,
    /// Spans the MEAS / MEAS? pair of one measurement.
    measurement_lock: Mutex<()>,
    /// Instrument settling time between MEAS and MEAS?.
    measurement_delay: Duration,
}

impl Lm510 {
    const DEVICE: &'static str = "cryomagnetics-lm510";

    /// Open the meter on a serial port and verify it responds.
    pub async fn new_async(config: &Lm510Config) -> Result<Self> {
        let port = cryo_core::serial::open_serial_async(&config.port, config.baud, Self::DEVICE)
            .await
            .context("Cryomagnetics LM-510: failed to open serial port")?;
        let driver = Self::from_port(wrap_shared(Box::new(port)));

        let channel = driver
            .active_channel()
            .await
            .context("Cryomagnetics LM-510: no response to CHAN? during validation")?;
        tracing::info!(channel, "Cryomagnetics LM-510 validated");

        Ok(driver)
    }

    /// Build the driver over an already open transport. Used by tests to
    /// substitute an in-memory stream for the serial port.
    pub fn from_port(port: SharedPort) -> Self {
        Self {
            engine: QueryEngine::new(port, Framing::lm510(), Self::DEVICE),
            measurement_lock: Mutex::new(()),
            measurement_delay: Duration::from_secs(1),
        }
    }

    /// Override the MEAS settling delay (tests use zero).
    pub fn with_measurement_delay(mut self, delay: Duration) -> Self {
        self.measurement_delay = delay;
        self
    }

    /// The channel currently selected on the front panel.
    pub async fn active_channel(&self) -> Result<u8> {
        let answer = self.engine.query("CHAN?").await?;
        answer
            .trim()
            .parse::<u8>()
            .with_context(|| format!("LM-510: unparseable CHAN? answer {answer:?}"))
    }

    /// Select a channel on the front panel.
    pub async fn select_channel(&self, channel: u8) -> Result<()> {
        validate_channel(channel)?;
        self.engine
            .query_optional(&format!("CHAN {channel}"))
            .await?;
        Ok(())
    }

    /// Read and decode the status byte.
    pub async fn status_byte(&self) -> Result<StatusByte> {
        let answer = self.engine.query("*STB?").await?;
        let byte = answer
            .trim()
            .parse::<u8>()
            .with_context(|| format!("LM-510: unparseable *STB? answer {answer:?}"))?;
        Ok(StatusByte(byte))
    }
}

#[async_trait]
impl LevelSensor for Lm510 {
    fn channels(&self) -> &'static [u8] {
        &CHANNELS
    }

    async fn data_ready(&self, channel: u8) -> Result<bool> {
        validate_channel(channel)?;
        let status = self.status_byte().await?;
        Ok(status.channel_ready(channel)?)
    }

    async fn measure(&self, channel: u8) -> Result<Quantity> {
        validate_channel(channel)?;

        if !self.data_ready(channel).await? {
            return Err(CryoError::DataNotReady {
                device: Self::DEVICE.to_string(),
                channel,
            }
            .into());
        }

        // Hold the measurement lock across the MEAS / MEAS? pair so a
        // second caller cannot slip its own MEAS in between.
        let _measuring = self.measurement_lock.lock().await;

        self.engine
            .query_optional(&format!("MEAS {channel}"))
            .await?;
        tokio::time::sleep(self.measurement_delay).await;

        let answer = self.engine.query(&format!("MEAS? {channel}")).await?;
        let level = parse_quantity(&answer)
            .with_context(|| format!("LM-510: unparseable level answer {answer:?}"))?;
        tracing::debug!(channel, level = %level, "measured cryogen level");
        Ok(level)
    }
}
