//! Lakeshore 475 gaussmeter driver.
//!
//! Unlike the Cryomagnetics instruments, the 475 speaks a conventional
//! line-delimited protocol over its GPIB-to-serial bridge: commands and
//! answers are `\r\n`-terminated and nothing is echoed, so responses can
//! be read line by line through a buffered reader.
//!
//! - Queries: `*IDN?`, `RDGFIELD?` (field in the active display unit),
//!   `UNIT?` (1 = gauss, 2 = tesla, 3 = oersted, 4 = A/m)
//! - Settings: `UNIT <n>`, `*RST`
//!
//! The driver forces gauss on connect so `RDGFIELD?` answers parse into a
//! gauss-tagged quantity without per-read unit juggling.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use cryo_core::capabilities::FieldSensor;
use cryo_core::quantity::{Quantity, Unit};
use cryo_core::serial::DynSerial;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Serial port wrapped for line-by-line reading.
pub type BufferedPort = Arc<Mutex<BufReader<DynSerial>>>;

const GAUSS_UNIT_CODE: u8 = 1;

/// Configuration for the Lakeshore 475 driver.
#[derive(Debug, Clone, Deserialize)]
pub struct Lakeshore475Config {
    /// Serial port path of the GPIB bridge (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate (default 9600)
    #[serde(default = "default_baud")]
    pub baud: u32,
}

fn default_baud() -> u32 {
    9600
}

/// Driver for the Lakeshore 475 gaussmeter.
pub struct Lakeshore475 {
    port: BufferedPort,
    timeout: Duration,
}

impl Lakeshore475 {
    const DEVICE: &'static str = "lakeshore-475";

    /// Open the gaussmeter, check its identity, and force gauss units.
    pub async fn new_async(config: &Lakeshore475Config) -> Result<Self> {
        let port = cryo_core::serial::open_serial_async(&config.port, config.baud, Self::DEVICE)
            .await
            .context("Lakeshore 475: failed to open serial port")?;
        let driver = Self::from_port(Arc::new(Mutex::new(BufReader::new(Box::new(port)))));

        let identity = driver.identify().await?;
        if !identity.contains("LSCI") {
            return Err(anyhow!(
                "Lakeshore 475 validation failed: unexpected identity {:?}",
                identity
            ));
        }
        driver.set_display_unit(GAUSS_UNIT_CODE).await?;
        tracing::info!(identity, "Lakeshore 475 validated");

        Ok(driver)
    }

    /// Build the driver over an already open transport. Used by tests to
    /// substitute an in-memory stream for the serial port.
    pub fn from_port(port: BufferedPort) -> Self {
        Self {
            port,
            timeout: Duration::from_millis(500),
        }
    }

    /// Query the instrument identity string.
    pub async fn identify(&self) -> Result<String> {
        self.query("*IDN?").await
    }

    /// Query the active display unit code.
    pub async fn display_unit(&self) -> Result<u8> {
        let answer = self.query("UNIT?").await?;
        answer
            .trim()
            .parse::<u8>()
            .with_context(|| format!("Lakeshore 475: unparseable UNIT? answer {answer:?}"))
    }

    /// Switch the display unit.
    pub async fn set_display_unit(&self, code: u8) -> Result<()> {
        if !(1..=4).contains(&code) {
            return Err(anyhow!("Lakeshore 475 unit code must be 1-4, got {code}"));
        }
        self.send(&format!("UNIT {code}")).await
    }

    /// Reset the instrument to power-up defaults.
    pub async fn reset(&self) -> Result<()> {
        self.send("*RST").await
    }

    /// Send a query and read the single answer line.
    async fn query(&self, command: &str) -> Result<String> {
        let mut port = self.port.lock().await;

        port.get_mut()
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .context("Lakeshore 475 write failed")?;

        let mut response = String::new();
        match tokio::time::timeout(self.timeout, port.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(anyhow!("Lakeshore 475 connection closed")),
            Ok(Ok(_)) => Ok(response.trim().to_string()),
            Ok(Err(e)) => Err(anyhow!("Lakeshore 475 read error: {e}")),
            Err(_) => Err(anyhow!("Lakeshore 475 read timeout on {command:?}")),
        }
    }

    /// Send a command that produces no answer.
    async fn send(&self, command: &str) -> Result<()> {
        let mut port = self.port.lock().await;
        port.get_mut()
            .write_all(format!("{command}\r\n").as_bytes())
            .await
            .context("Lakeshore 475 write failed")?;
        Ok(())
    }
}

#[async_trait]
impl FieldSensor for Lakeshore475 {
    async fn field(&self) -> Result<Quantity> {
        let answer = self.query("RDGFIELD?").await?;
        let value: f64 = answer
            .trim()
            .parse()
            .with_context(|| format!("Lakeshore 475: unparseable field answer {answer:?}"))?;
        Ok(Quantity::new(value, Unit::Gauss))
    }
}
