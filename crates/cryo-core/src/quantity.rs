//! Physical quantities: a magnitude tagged with a unit.
//!
//! Instruments report values like `"87.424A"` or `"15.0 cm"`. This module
//! provides the closed unit vocabulary, the [`Quantity`] value type, and
//! [`parse_quantity`] for turning a device answer into a quantity.
//!
//! Quantities of different units refuse to mix: addition and subtraction
//! return an error, and comparison yields no ordering. The conversion
//! between centimeters and inches is explicit via [`Quantity::convert_to`].
//!
//! A measurement that could not be obtained is represented by the NaN
//! sentinel from [`Quantity::unknown`], so downstream consumers always see
//! a value of the expected unit rather than an error.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{CryoError, CryoResult};

const CM_PER_INCH: f64 = 2.54;

/// Closed vocabulary of units the instruments report in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Electrical current (power supply output)
    Ampere,
    /// Magnetic field (gaussmeter, power supply field mode)
    Gauss,
    /// Cryogen level (level meter)
    Centimeter,
    /// Cryogen level, imperial (level meter alternative)
    Inch,
    /// Cryogen level relative to sensor span (level meter alternative)
    Percent,
}

impl Unit {
    /// Canonical symbol, as printed after a magnitude.
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Ampere => "A",
            Unit::Gauss => "G",
            Unit::Centimeter => "cm",
            Unit::Inch => "in",
            Unit::Percent => "%",
        }
    }

    /// Resolve a unit token as it appears in a device answer.
    ///
    /// The level meter prints units in upper case (`CM`, `IN`, `PERCENT`);
    /// the power supply uses single letters (`A`, `G`).
    pub fn from_token(token: &str) -> Option<Unit> {
        match token {
            "A" => Some(Unit::Ampere),
            "G" => Some(Unit::Gauss),
            "cm" | "CM" => Some(Unit::Centimeter),
            "in" | "IN" => Some(Unit::Inch),
            "%" | "PERCENT" => Some(Unit::Percent),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A numeric magnitude tagged with a [`Unit`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quantity {
    value: f64,
    unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// The sentinel for a measurement that could not be obtained.
    pub fn unknown(unit: Unit) -> Self {
        Self {
            value: f64::NAN,
            unit,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// True if this is the "could not measure" sentinel.
    pub fn is_unknown(&self) -> bool {
        self.value.is_nan()
    }

    /// Add two quantities of the same unit.
    pub fn checked_add(&self, other: &Quantity) -> CryoResult<Quantity> {
        self.require_same_unit(other)?;
        Ok(Quantity::new(self.value + other.value, self.unit))
    }

    /// Subtract a quantity of the same unit.
    pub fn checked_sub(&self, other: &Quantity) -> CryoResult<Quantity> {
        self.require_same_unit(other)?;
        Ok(Quantity::new(self.value - other.value, self.unit))
    }

    /// Convert between the length units. Only centimeters and inches are
    /// convertible; any other pairing is a unit mismatch.
    pub fn convert_to(&self, target: Unit) -> CryoResult<Quantity> {
        if self.unit == target {
            return Ok(*self);
        }
        match (self.unit, target) {
            (Unit::Centimeter, Unit::Inch) => Ok(Quantity::new(self.value / CM_PER_INCH, target)),
            (Unit::Inch, Unit::Centimeter) => Ok(Quantity::new(self.value * CM_PER_INCH, target)),
            _ => Err(self.mismatch(target)),
        }
    }

    fn require_same_unit(&self, other: &Quantity) -> CryoResult<()> {
        if self.unit == other.unit {
            Ok(())
        } else {
            Err(self.mismatch(other.unit))
        }
    }

    fn mismatch(&self, other: Unit) -> CryoError {
        CryoError::UnitMismatch {
            left: self.unit.symbol(),
            right: other.symbol(),
        }
    }
}

/// Equal only when units match and magnitudes compare equal.
impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.unit == other.unit && self.value == other.value
    }
}

/// Ordered only within a unit; quantities of different units have no order.
impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.unit != other.unit {
            return None;
        }
        self.value.partial_cmp(&other.value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Parse a device answer of the form `<number><unit>` into a [`Quantity`].
///
/// The numeric literal may be signed and decimal; whitespace between the
/// number and the unit token is tolerated (the level meter prints
/// `"15.0 cm"`, the power supply prints `"87.424A"`).
pub fn parse_quantity(answer: &str) -> CryoResult<Quantity> {
    let trimmed = answer.trim();

    let numeric_len = trimmed
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-')))
        .count();
    let (number, rest) = trimmed.split_at(numeric_len);

    let value: f64 = number.parse().map_err(|_| CryoError::MalformedQuantity {
        answer: answer.to_string(),
    })?;

    let token = rest.trim_start();
    let unit = Unit::from_token(token).ok_or_else(|| CryoError::UnrecognizedUnit {
        token: token.to_string(),
        answer: answer.to_string(),
    })?;

    Ok(Quantity::new(value, unit))
}
