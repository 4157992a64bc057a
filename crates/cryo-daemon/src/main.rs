//! Daemon entry point: load configuration, connect the instruments, run
//! the measurement loop until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cryo_core::dispatch::Dispatcher;
use cryo_core::store::{Store, VariableId};
use cryo_daemon::config::DaemonConfig;
use cryo_daemon::monitor::{ChannelAssignment, Instruments, Monitor};
use cryo_daemon::report::CsvReporter;
use cryo_driver_cryomagnetics::{Lm510, Lm510Config, Model4g, Model4gConfig};
use cryo_driver_lakeshore::{Lakeshore475, Lakeshore475Config};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "cryo-daemon", about = "Cryostat monitoring daemon")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, default_value = "cryo-daemon.toml")]
    config: PathBuf,

    /// Override the sample interval from the config file, e.g. "30s"
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = DaemonConfig::load(&cli.config)?;
    tracing::info!(config = ?cli.config, "configuration loaded");

    let gaussmeter = Lakeshore475::new_async(&Lakeshore475Config {
        port: config.instruments.gaussmeter_port.clone(),
        baud: 9600,
    })
    .await
    .context("failed to connect gaussmeter")?;

    let level_meter = Lm510::new_async(&Lm510Config {
        port: config.instruments.level_meter_port.clone(),
        baud: 9600,
    })
    .await
    .context("failed to connect level meter")?;

    let power_supply = Model4g::new_async(&Model4gConfig {
        port: config.instruments.power_supply_port.clone(),
        baud: 9600,
    })
    .await
    .context("failed to connect power supply")?;

    let dispatcher = Dispatcher::new();
    let store = Arc::new(Store::new(&dispatcher));

    let sample_interval = cli.interval.unwrap_or(config.monitor.sample_interval);
    store
        .variable::<Duration>(VariableId::LoggingInterval)
        .set(sample_interval);
    store
        .variable::<PathBuf>(VariableId::OutputDirectory)
        .set(config.monitor.output_directory.clone());

    let reporter = CsvReporter::create(&config.monitor.output_directory)?;
    tracing::info!(log = ?reporter.path(), interval = ?sample_interval, "starting monitor");

    let instruments = Instruments {
        gaussmeter: Arc::new(gaussmeter),
        level_meter: Arc::new(level_meter),
        power_supply: Arc::new(power_supply),
    };
    let channels = ChannelAssignment {
        liquid_helium: config.instruments.liquid_helium_channel,
        liquid_nitrogen: config.instruments.liquid_nitrogen_channel,
    };

    let mut monitor = Monitor::new(
        instruments,
        channels,
        store,
        dispatcher,
        config.monitor.task_timeout,
    )
    .with_reporter(reporter);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("caught interrupt signal, exiting");
            let _ = shutdown_tx.send(true);
        }
    });

    monitor.run(shutdown_rx).await
}
