//! `cryo-core`
//!
//! Core types for the cryostat monitoring daemon: physical quantities and
//! their parsers, the reactive variable store, the task dispatch layer,
//! instrument capability traits, and shared serial plumbing.
//!
//! Driver crates (`cryo-driver-cryomagnetics`, `cryo-driver-lakeshore`)
//! build on the [`serial`] module and implement the [`capabilities`]
//! traits; the daemon wires drivers, [`dispatch::Dispatcher`], and
//! [`store::Store`] together into the measurement loop.

pub mod capabilities;
pub mod dispatch;
pub mod error;
pub mod quantity;
pub mod serial;
pub mod store;

// Re-export commonly used types
pub use anyhow::Result;
pub use capabilities::{CurrentSupply, FieldSensor, LevelSensor, SweepControl, SweepMode};
pub use dispatch::{Dispatcher, TaskHandle};
pub use error::{CryoError, CryoResult};
pub use quantity::{parse_quantity, Quantity, Unit};
pub use store::{Store, Subscription, Variable, VariableId};
