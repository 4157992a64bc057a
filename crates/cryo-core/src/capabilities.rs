//! Instrument capability traits.
//!
//! Each instrument family is a closed set of capabilities expressed as a
//! small async trait, never a subclass of a shared protocol base. A driver
//! implements exactly the capabilities its hardware has:
//!
//! - the gaussmeter implements [`FieldSensor`]
//! - the level meter implements [`LevelSensor`]
//! - the magnet power supply implements [`CurrentSupply`] and
//!   [`SweepControl`]
//!
//! All methods take `&self`; drivers use interior mutability (the port
//! mutex) so a single instance can be shared across tasks.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

/// Direction for a power supply current sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SweepMode {
    Up,
    Down,
    Zero,
    Pause,
}

impl SweepMode {
    /// The keyword used on the wire.
    pub fn keyword(&self) -> &'static str {
        match self {
            SweepMode::Up => "UP",
            SweepMode::Down => "DOWN",
            SweepMode::Zero => "ZERO",
            SweepMode::Pause => "PAUSE",
        }
    }
}

/// Capability: magnetic field readout (gaussmeters).
#[async_trait]
pub trait FieldSensor: Send + Sync {
    /// Measure the field. The returned quantity carries the device's
    /// current display unit (gauss for the instruments handled here).
    async fn field(&self) -> Result<Quantity>;
}

/// Capability: multi-channel cryogen level measurement.
///
/// Channels are validated against the driver's allow-list before any I/O;
/// an invalid channel is a programming error, never a device condition.
#[async_trait]
pub trait LevelSensor: Send + Sync {
    /// The channels this instrument exposes.
    fn channels(&self) -> &'static [u8];

    /// Whether the given channel has a fresh reading available.
    async fn data_ready(&self, channel: u8) -> Result<bool>;

    /// Measure the level on the given channel.
    async fn measure(&self, channel: u8) -> Result<Quantity>;
}

/// Capability: magnet power supply output readout and limits.
#[async_trait]
pub trait CurrentSupply: Send + Sync {
    /// The output current, in amperes.
    async fn output_current(&self) -> Result<Quantity>;

    /// Set the upper sweep current limit.
    async fn set_upper_limit(&self, limit: Quantity) -> Result<()>;

    /// Set the lower sweep current limit.
    async fn set_lower_limit(&self, limit: Quantity) -> Result<()>;
}

/// Capability: magnet power supply sweep control.
#[async_trait]
pub trait SweepControl: Send + Sync {
    /// Start (or pause) a sweep in the given direction.
    async fn sweep(&self, mode: SweepMode, fast: bool) -> Result<()>;
}
