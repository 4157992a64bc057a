//! End-to-end tests of the measurement loop against mock instruments.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cryo_core::capabilities::{CurrentSupply, FieldSensor, LevelSensor, SweepControl, SweepMode};
use cryo_core::dispatch::Dispatcher;
use cryo_core::quantity::{Quantity, Unit};
use cryo_core::store::{Store, VariableId};
use cryo_daemon::monitor::{ChannelAssignment, Instruments, Monitor};
use cryo_daemon::report::CsvReporter;
use cryo_daemon::tasks;
use std::sync::Mutex;

struct MockGaussmeter {
    field: f64,
    fail: bool,
}

#[async_trait]
impl FieldSensor for MockGaussmeter {
    async fn field(&self) -> Result<Quantity> {
        if self.fail {
            anyhow::bail!("gaussmeter unplugged");
        }
        Ok(Quantity::new(self.field, Unit::Gauss))
    }
}

struct MockLevelMeter {
    measurements: AtomicUsize,
}

#[async_trait]
impl LevelSensor for MockLevelMeter {
    fn channels(&self) -> &'static [u8] {
        &[1, 2]
    }

    async fn data_ready(&self, _channel: u8) -> Result<bool> {
        Ok(true)
    }

    async fn measure(&self, channel: u8) -> Result<Quantity> {
        self.measurements.fetch_add(1, Ordering::SeqCst);
        // Channel 1 carries helium, channel 2 nitrogen.
        let level = match channel {
            1 => 12.5,
            _ => 30.0,
        };
        Ok(Quantity::new(level, Unit::Centimeter))
    }
}

#[derive(Default)]
struct MockPowerSupply {
    slow: bool,
    upper_limit: Mutex<Option<Quantity>>,
    lower_limit: Mutex<Option<Quantity>>,
    last_sweep: Mutex<Option<(SweepMode, bool)>>,
}

impl MockPowerSupply {
    fn new(slow: bool) -> Self {
        Self {
            slow,
            ..Default::default()
        }
    }
}

#[async_trait]
impl CurrentSupply for MockPowerSupply {
    async fn output_current(&self) -> Result<Quantity> {
        if self.slow {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        Ok(Quantity::new(87.424, Unit::Ampere))
    }

    async fn set_upper_limit(&self, limit: Quantity) -> Result<()> {
        *self.upper_limit.lock().unwrap() = Some(limit);
        Ok(())
    }

    async fn set_lower_limit(&self, limit: Quantity) -> Result<()> {
        *self.lower_limit.lock().unwrap() = Some(limit);
        Ok(())
    }
}

#[async_trait]
impl SweepControl for MockPowerSupply {
    async fn sweep(&self, mode: SweepMode, fast: bool) -> Result<()> {
        *self.last_sweep.lock().unwrap() = Some((mode, fast));
        Ok(())
    }
}

fn monitor_with(
    gaussmeter: MockGaussmeter,
    level_meter: Arc<MockLevelMeter>,
    power_supply: MockPowerSupply,
    task_timeout: Duration,
) -> Monitor {
    let dispatcher = Dispatcher::new();
    let store = Arc::new(Store::new(&dispatcher));
    let instruments = Instruments {
        gaussmeter: Arc::new(gaussmeter),
        level_meter,
        power_supply: Arc::new(power_supply),
    };
    let channels = ChannelAssignment {
        liquid_helium: 1,
        liquid_nitrogen: 2,
    };
    Monitor::new(instruments, channels, store, dispatcher, task_timeout)
}

#[tokio::test]
async fn cycle_writes_all_variables() {
    let level_meter = Arc::new(MockLevelMeter {
        measurements: AtomicUsize::new(0),
    });
    let mut monitor = monitor_with(
        MockGaussmeter {
            field: 271.45,
            fail: false,
        },
        level_meter.clone(),
        MockPowerSupply::new(false),
        Duration::from_secs(5),
    );

    monitor.run_cycle().await.unwrap();

    let store = monitor.store();
    assert_eq!(
        store.quantity(VariableId::LiquidHeliumLevel).get().value(),
        12.5
    );
    assert_eq!(
        store
            .quantity(VariableId::LiquidNitrogenLevel)
            .get()
            .value(),
        30.0
    );
    assert_eq!(store.quantity(VariableId::Current).get().value(), 87.424);
    assert_eq!(
        store.quantity(VariableId::MagneticField).get().value(),
        271.45
    );
    // Both channels were measured once.
    assert_eq!(level_meter.measurements.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_instrument_yields_sentinel_others_unaffected() {
    let level_meter = Arc::new(MockLevelMeter {
        measurements: AtomicUsize::new(0),
    });
    let mut monitor = monitor_with(
        MockGaussmeter {
            field: 0.0,
            fail: true,
        },
        level_meter,
        MockPowerSupply::new(false),
        Duration::from_secs(5),
    );

    monitor.run_cycle().await.unwrap();

    let store = monitor.store();
    let field = store.quantity(VariableId::MagneticField).get();
    assert!(field.is_unknown());
    assert_eq!(field.unit(), Unit::Gauss);
    assert_eq!(store.quantity(VariableId::Current).get().value(), 87.424);
}

#[tokio::test]
async fn slow_instrument_times_out_to_sentinel() {
    let level_meter = Arc::new(MockLevelMeter {
        measurements: AtomicUsize::new(0),
    });
    let mut monitor = monitor_with(
        MockGaussmeter {
            field: 271.45,
            fail: false,
        },
        level_meter,
        MockPowerSupply::new(true),
        Duration::from_millis(500),
    );

    let started = std::time::Instant::now();
    monitor.run_cycle().await.unwrap();
    // The cycle must not wait out the 60 s mock query.
    assert!(started.elapsed() < Duration::from_secs(10));

    let store = monitor.store();
    assert!(store.quantity(VariableId::Current).get().is_unknown());
    assert_eq!(
        store.quantity(VariableId::MagneticField).get().value(),
        271.45
    );
}

#[tokio::test]
async fn reporter_appends_row_per_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let level_meter = Arc::new(MockLevelMeter {
        measurements: AtomicUsize::new(0),
    });
    let mut monitor = monitor_with(
        MockGaussmeter {
            field: 271.45,
            fail: false,
        },
        level_meter,
        MockPowerSupply::new(false),
        Duration::from_secs(5),
    )
    .with_reporter(CsvReporter::create(dir.path()).unwrap());

    monitor.run_cycle().await.unwrap();
    monitor.run_cycle().await.unwrap();

    let contents = std::fs::read_to_string(dir.path().join("cryostat-log.csv")).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("time,"));
    assert!(lines[1].contains("87.424"));
}

#[tokio::test]
async fn store_listener_sees_cycle_updates() {
    let level_meter = Arc::new(MockLevelMeter {
        measurements: AtomicUsize::new(0),
    });
    let mut monitor = monitor_with(
        MockGaussmeter {
            field: 271.45,
            fail: false,
        },
        level_meter,
        MockPowerSupply::new(false),
        Duration::from_secs(5),
    );

    let mut rx = monitor
        .store()
        .quantity(VariableId::MagneticField)
        .subscribe();

    monitor.run_cycle().await.unwrap();

    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().value(), 271.45);
}

#[tokio::test]
async fn sweep_and_limit_tasks_reach_supply_and_store() {
    let dispatcher = Dispatcher::new();
    let store = Arc::new(Store::new(&dispatcher));
    let supply = Arc::new(MockPowerSupply::new(false));

    tasks::set_upper_sweep_current(
        supply.clone(),
        store.clone(),
        Quantity::new(45.0, Unit::Ampere),
    )
    .await
    .unwrap();
    tasks::set_lower_sweep_current(
        supply.clone(),
        store.clone(),
        Quantity::new(0.0, Unit::Ampere),
    )
    .await
    .unwrap();
    tasks::sweep_power_supply(supply.clone(), SweepMode::Up, true)
        .await
        .unwrap();

    assert_eq!(
        supply.upper_limit.lock().unwrap().unwrap().value(),
        45.0
    );
    assert_eq!(supply.lower_limit.lock().unwrap().unwrap().value(), 0.0);
    assert_eq!(
        *supply.last_sweep.lock().unwrap(),
        Some((SweepMode::Up, true))
    );
    assert_eq!(
        store.quantity(VariableId::UpperSweepCurrent).get().value(),
        45.0
    );
    assert_eq!(
        store.quantity(VariableId::LowerSweepCurrent).get().value(),
        0.0
    );
}
