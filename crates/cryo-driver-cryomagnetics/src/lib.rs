//! `cryo-driver-cryomagnetics`
//!
//! Drivers for the Cryomagnetics instruments: the 4G superconducting
//! magnet power supply and the LM-510 liquid cryogen level monitor, plus
//! the echo-framed query protocol engine they share.

pub mod level_meter;
pub mod power_supply;
pub mod protocol;

pub use level_meter::{Lm510, Lm510Config, StatusByte, CHANNELS};
pub use power_supply::{Model4g, Model4gConfig};
pub use protocol::{parse_frame, Framing, QueryEngine};
