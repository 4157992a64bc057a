//! Units of work submitted to the dispatcher.
//!
//! Each report task performs one instrument measurement and then waits the
//! minimum inter-sample time the instruments need before they can be asked
//! again. Control tasks (sweeps, limits) write their effect back into the
//! store so observers see the commanded state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cryo_core::capabilities::{CurrentSupply, FieldSensor, LevelSensor, SweepControl, SweepMode};
use cryo_core::quantity::Quantity;
use cryo_core::store::{Store, VariableId};

/// Time the instruments need between consecutive samples.
const MIN_TIME_BETWEEN_SAMPLES: Duration = Duration::from_millis(300);

async fn settle() {
    tokio::time::sleep(MIN_TIME_BETWEEN_SAMPLES).await;
}

/// Measure a cryogen level on the given channel.
pub async fn report_level(sensor: Arc<dyn LevelSensor>, channel: u8) -> Result<Quantity> {
    let level = sensor.measure(channel).await?;
    settle().await;
    Ok(level)
}

/// Measure the power supply output current.
pub async fn report_current(supply: Arc<dyn CurrentSupply>) -> Result<Quantity> {
    let current = supply.output_current().await?;
    settle().await;
    Ok(current)
}

/// Measure the magnetic field.
pub async fn report_field(sensor: Arc<dyn FieldSensor>) -> Result<Quantity> {
    let field = sensor.field().await?;
    settle().await;
    Ok(field)
}

/// Set the upper sweep current limit and record it in the store.
pub async fn set_upper_sweep_current(
    supply: Arc<dyn CurrentSupply>,
    store: Arc<Store>,
    limit: Quantity,
) -> Result<()> {
    supply.set_upper_limit(limit).await?;
    store.quantity(VariableId::UpperSweepCurrent).set(limit);
    Ok(())
}

/// Set the lower sweep current limit and record it in the store.
pub async fn set_lower_sweep_current(
    supply: Arc<dyn CurrentSupply>,
    store: Arc<Store>,
    limit: Quantity,
) -> Result<()> {
    supply.set_lower_limit(limit).await?;
    store.quantity(VariableId::LowerSweepCurrent).set(limit);
    Ok(())
}

/// Sweep the power supply current in the given direction.
pub async fn sweep_power_supply(
    supply: Arc<dyn SweepControl>,
    mode: SweepMode,
    fast: bool,
) -> Result<()> {
    supply.sweep(mode, fast).await
}
