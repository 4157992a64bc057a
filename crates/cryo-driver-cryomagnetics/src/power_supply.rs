//! Cryomagnetics 4G superconducting magnet power supply driver.
//!
//! Protocol overview:
//! - Format: ASCII commands with echo-based framing (see [`crate::protocol`])
//! - Baud: 9600, 8N1, no flow control
//! - Commands write `\r\n`; the echo ends `\r\r\n`, the answer `\r\n`
//! - Queries: `UNITS?`, `IOUT?`, `ULIM?`, `LLIM?`
//! - Settings: `UNITS <A|G>`, `ULIM <value>`, `LLIM <value>`,
//!   `SWEEP {UP|DOWN|ZERO|PAUSE} [FAST]`, `REMOTE`, `LOCAL`
//!
//! The supply reports its output either as amperes or as the predicted
//! magnetic field in gauss, depending on the active display unit. Current
//! reads therefore force ampere units first and give the supply a short
//! settling delay before `IOUT?`.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cryo_core::capabilities::{CurrentSupply, SweepControl, SweepMode};
use cryo_core::quantity::{parse_quantity, Quantity, Unit};
use cryo_core::serial::{wrap_shared, SharedPort};
use serde::Deserialize;

use crate::protocol::{Framing, QueryEngine};

/// Configuration for the 4G driver.
#[derive(Debug, Clone, Deserialize)]
pub struct Model4gConfig {
    /// Serial port path (e.g., "/dev/ttyUSB2")
    pub port: String,
    /// Baud rate (default 9600)
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    9600
}

/// Driver for the Cryomagnetics 4G power supply.
pub struct Model4g {
    engine: QueryEngine,
    /// Settling time between a unit change and the following measurement.
    measurement_delay: Duration,
}

impl Model4g {
    const DEVICE: &'static str = "cryomagnetics-4g";

    /// Open the supply on a serial port and verify it responds.
    pub async fn new_async(config: &Model4gConfig) -> Result<Self> {
        let port = cryo_core::serial::open_serial_async(&config.port, config.baud, Self::DEVICE)
            .await
            .context("Cryomagnetics 4G: failed to open serial port")?;
        let driver = Self::from_port(wrap_shared(Box::new(port)));

        // Take the front panel out of the loop, then verify the supply
        // answers a query.
        driver.remote().await.context("Cryomagnetics 4G: REMOTE failed")?;
        let unit = driver
            .units()
            .await
            .context("Cryomagnetics 4G: no response to UNITS? during validation")?;
        tracing::info!(unit = %unit, "Cryomagnetics 4G validated");

        Ok(driver)
    }

    /// Build the driver over an already open transport. Used by tests to
    /// substitute an in-memory stream for the serial port.
    pub fn from_port(port: SharedPort) -> Self {
        Self {
            engine: QueryEngine::new(port, Framing::model_4g(), Self::DEVICE),
            measurement_delay: Duration::from_millis(500),
        }
    }

    /// Override the unit-change settling delay (tests use zero).
    pub fn with_measurement_delay(mut self, delay: Duration) -> Self {
        self.measurement_delay = delay;
        self
    }

    /// The unit the supply currently reports its output in.
    pub async fn units(&self) -> Result<Unit> {
        let answer = self.engine.query("UNITS?").await?;
        match answer.trim() {
            "A" => Ok(Unit::Ampere),
            "G" => Ok(Unit::Gauss),
            other => Err(anyhow!(
                "Cryomagnetics 4G reported unknown unit {:?}",
                other
            )),
        }
    }

    /// Switch the supply's display unit. Only amperes and gauss are valid.
    pub async fn set_units(&self, unit: Unit) -> Result<()> {
        let token = match unit {
            Unit::Ampere => "A",
            Unit::Gauss => "G",
            other => return Err(anyhow!("Cryomagnetics 4G cannot display {}", other)),
        };
        self.engine
            .query_optional(&format!("UNITS {token}"))
            .await?;
        Ok(())
    }

    /// Query the upper sweep current limit.
    pub async fn upper_limit(&self) -> Result<Quantity> {
        let answer = self.engine.query("ULIM?").await?;
        Ok(parse_quantity(&answer)?)
    }

    /// Query the lower sweep current limit.
    pub async fn lower_limit(&self) -> Result<Quantity> {
        let answer = self.engine.query("LLIM?").await?;
        Ok(parse_quantity(&answer)?)
    }

    /// Hand control to the remote interface.
    pub async fn remote(&self) -> Result<()> {
        self.engine.query_optional("REMOTE").await?;
        Ok(())
    }

    /// Return control to the front panel.
    pub async fn local(&self) -> Result<()> {
        self.engine.query_optional("LOCAL").await?;
        Ok(())
    }

    fn require_amperes(limit: &Quantity) -> Result<f64> {
        if limit.unit() != Unit::Ampere {
            return Err(anyhow!(
                "sweep limits must be in amperes, got {}",
                limit.unit()
            ));
        }
        Ok(limit.value())
    }
}

#[async_trait]
impl CurrentSupply for Model4g {
    async fn output_current(&self) -> Result<Quantity> {
        // IOUT? reports in the active display unit; force amperes and let
        // the supply settle before measuring.
        self.set_units(Unit::Ampere).await?;
        tokio::time::sleep(self.measurement_delay).await;

        let answer = self.engine.query("IOUT?").await?;
        let current = parse_quantity(&answer)
            .with_context(|| format!("Cryomagnetics 4G: unparseable IOUT? answer {answer:?}"))?;
        if current.unit() != Unit::Ampere {
            return Err(anyhow!(
                "Cryomagnetics 4G answered IOUT? in {} despite ampere mode",
                current.unit()
            ));
        }
        Ok(current)
    }

    async fn set_upper_limit(&self, limit: Quantity) -> Result<()> {
        let amps = Self::require_amperes(&limit)?;
        self.engine
            .query_optional(&format!("ULIM {amps}"))
            .await?;
        tracing::debug!(amps, "set upper sweep limit");
        Ok(())
    }

    async fn set_lower_limit(&self, limit: Quantity) -> Result<()> {
        let amps = Self::require_amperes(&limit)?;
        self.engine
            .query_optional(&format!("LLIM {amps}"))
            .await?;
        tracing::debug!(amps, "set lower sweep limit");
        Ok(())
    }
}

#[async_trait]
impl SweepControl for Model4g {
    async fn sweep(&self, mode: SweepMode, fast: bool) -> Result<()> {
        // PAUSE takes no FAST modifier.
        let command = if fast && mode != SweepMode::Pause {
            format!("SWEEP {} FAST", mode.keyword())
        } else {
            format!("SWEEP {}", mode.keyword())
        };
        self.engine.query_optional(&command).await?;
        tracing::info!(mode = mode.keyword(), fast, "sweep command issued");
        Ok(())
    }
}
