//! `cryo-daemon`
//!
//! Wires the instrument drivers, the dispatch layer, and the reactive
//! store into the periodic measurement loop, and writes the CSV log.

pub mod config;
pub mod monitor;
pub mod report;
pub mod tasks;

pub use config::DaemonConfig;
pub use monitor::{ChannelAssignment, Instruments, Monitor};
pub use report::{CsvReporter, CycleValues};
