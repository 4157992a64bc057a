//! The measurement loop.
//!
//! Each cycle submits one report task per tracked quantity, waits for the
//! results with the configured task timeout, and writes them into the
//! store. A task that fails or times out contributes the NaN sentinel
//! instead, so downstream consumers always see a value; the failure is
//! logged by the dispatch layer with the task's label. There is no
//! retry: the next cycle is the retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cryo_core::capabilities::{CurrentSupply, FieldSensor, LevelSensor};
use cryo_core::dispatch::Dispatcher;
use cryo_core::quantity::{Quantity, Unit};
use cryo_core::store::{Store, VariableId};
use tokio::sync::watch;

use crate::report::{CsvReporter, CycleValues};

/// The instrument trio the daemon polls.
#[derive(Clone)]
pub struct Instruments {
    pub gaussmeter: Arc<dyn FieldSensor>,
    pub level_meter: Arc<dyn LevelSensor>,
    pub power_supply: Arc<dyn CurrentSupply>,
}

/// Level meter channel wiring.
#[derive(Debug, Clone, Copy)]
pub struct ChannelAssignment {
    pub liquid_helium: u8,
    pub liquid_nitrogen: u8,
}

/// Drives periodic measurement cycles against the store.
pub struct Monitor {
    instruments: Instruments,
    channels: ChannelAssignment,
    store: Arc<Store>,
    dispatcher: Dispatcher,
    task_timeout: Duration,
    reporter: Option<CsvReporter>,
}

impl Monitor {
    pub fn new(
        instruments: Instruments,
        channels: ChannelAssignment,
        store: Arc<Store>,
        dispatcher: Dispatcher,
        task_timeout: Duration,
    ) -> Self {
        Self {
            instruments,
            channels,
            store,
            dispatcher,
            task_timeout,
            reporter: None,
        }
    }

    /// Attach a CSV reporter; one row is appended per cycle.
    pub fn with_reporter(mut self, reporter: CsvReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Shared store handle.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run one measurement cycle: poll every quantity, then publish.
    pub async fn run_cycle(&mut self) -> Result<()> {
        tracing::debug!("measuring variables");

        let ln2_task = self.dispatcher.submit(
            "report:liquid_nitrogen_level",
            crate::tasks::report_level(
                self.instruments.level_meter.clone(),
                self.channels.liquid_nitrogen,
            ),
        );
        let lhe_task = self.dispatcher.submit(
            "report:liquid_helium_level",
            crate::tasks::report_level(
                self.instruments.level_meter.clone(),
                self.channels.liquid_helium,
            ),
        );
        let current_task = self.dispatcher.submit(
            "report:current",
            crate::tasks::report_current(self.instruments.power_supply.clone()),
        );
        let field_task = self.dispatcher.submit(
            "report:magnetic_field",
            crate::tasks::report_field(self.instruments.gaussmeter.clone()),
        );

        let timeout = self.task_timeout;
        let liquid_nitrogen = recover(ln2_task.wait(timeout).await, Unit::Centimeter);
        let liquid_helium = recover(lhe_task.wait(timeout).await, Unit::Centimeter);
        let current = recover(current_task.wait(timeout).await, Unit::Ampere);
        let field = recover(field_task.wait(timeout).await, Unit::Gauss);

        self.store
            .quantity(VariableId::LiquidNitrogenLevel)
            .set(liquid_nitrogen);
        self.store
            .quantity(VariableId::LiquidHeliumLevel)
            .set(liquid_helium);
        self.store.quantity(VariableId::Current).set(current);
        self.store.quantity(VariableId::MagneticField).set(field);

        if let Some(reporter) = &mut self.reporter {
            reporter.append_cycle(&CycleValues {
                liquid_nitrogen,
                liquid_helium,
                current,
                field,
            })?;
        }

        Ok(())
    }

    /// Run cycles on the store's logging interval until `shutdown` fires.
    ///
    /// Interval changes written to the store take effect on the next tick.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            let interval = self
                .store
                .variable::<Duration>(VariableId::LoggingInterval)
                .get();

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(error) = self.run_cycle().await {
                        tracing::error!(%error, "measurement cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("monitor loop stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Substitute the sentinel for a failed or timed-out measurement.
fn recover(result: Result<Quantity>, unit: Unit) -> Quantity {
    match result {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(%error, unit = %unit, "substituting sentinel for failed measurement");
            Quantity::unknown(unit)
        }
    }
}
