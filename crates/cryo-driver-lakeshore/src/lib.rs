//! `cryo-driver-lakeshore`
//!
//! Driver for the Lakeshore 475 gaussmeter.

pub mod gaussmeter;

pub use gaussmeter::{BufferedPort, Lakeshore475, Lakeshore475Config};
