//! CSV measurement log.
//!
//! One file per daemon run, one row per measurement cycle. Values that
//! could not be measured appear as `NaN`, so a row is written for every
//! cycle regardless of instrument health.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use cryo_core::quantity::Quantity;

/// File name inside the configured output directory.
const LOG_FILE_NAME: &str = "cryostat-log.csv";

const TITLE_ROW: [&str; 5] = [
    "time",
    "liquid_nitrogen_cm",
    "liquid_helium_cm",
    "current_a",
    "field_g",
];

/// The measured values of one cycle, in row order.
#[derive(Debug, Clone, Copy)]
pub struct CycleValues {
    pub liquid_nitrogen: Quantity,
    pub liquid_helium: Quantity,
    pub current: Quantity,
    pub field: Quantity,
}

/// Appends measurement rows to the CSV log.
pub struct CsvReporter {
    writer: csv::Writer<std::fs::File>,
    path: PathBuf,
}

impl CsvReporter {
    /// Create the log in `output_dir`, writing the title row once.
    pub fn create(output_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(output_dir).with_context(|| {
            format!("failed to create output directory {}", output_dir.display())
        })?;
        let path = output_dir.join(LOG_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let already_has_title = file.metadata().map(|m| m.len() > 0).unwrap_or(false);

        let mut reporter = Self {
            writer: csv::Writer::from_writer(file),
            path,
        };
        if !already_has_title {
            reporter.writer.write_record(TITLE_ROW)?;
            reporter.writer.flush()?;
        }
        Ok(reporter)
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one cycle's values, timestamped now.
    pub fn append_cycle(&mut self, values: &CycleValues) -> Result<()> {
        self.append_cycle_at(Local::now(), values)
    }

    fn append_cycle_at(&mut self, time: DateTime<Local>, values: &CycleValues) -> Result<()> {
        self.writer.write_record([
            time.format("%Y-%m-%d %H:%M:%S").to_string(),
            format_value(&values.liquid_nitrogen),
            format_value(&values.liquid_helium),
            format_value(&values.current),
            format_value(&values.field),
        ])?;
        self.writer.flush()?;
        Ok(())
    }
}

fn format_value(quantity: &Quantity) -> String {
    quantity.value().to_string()
}
