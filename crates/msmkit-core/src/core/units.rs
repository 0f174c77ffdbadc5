use phf::{Map, phf_map};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Decimal exponent of each unit relative to one second.
static UNIT_EXPONENTS: Map<&'static str, i32> = phf_map! {
    "fs" => -15,
    "ps" => -12,
    "ns" => -9,
    "us" => -6,
    "ms" => -3,
    "s" => 0,
};

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum UnitError {
    #[error("Unknown time unit '{0}' (expected fs, ps, ns, us, ms or s)")]
    UnknownUnit(String),
    #[error("Time has to be in the format \"value unit\", e.g. \"10 ps\". Was: '{0}'")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Femtoseconds,
    Picoseconds,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            TimeUnit::Femtoseconds => "fs",
            TimeUnit::Picoseconds => "ps",
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
        }
    }

    fn exponent(&self) -> i32 {
        UNIT_EXPONENTS[self.symbol()]
    }
}

impl FromStr for TimeUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fs" => Ok(TimeUnit::Femtoseconds),
            "ps" => Ok(TimeUnit::Picoseconds),
            "ns" => Ok(TimeUnit::Nanoseconds),
            "us" => Ok(TimeUnit::Microseconds),
            "ms" => Ok(TimeUnit::Milliseconds),
            "s" => Ok(TimeUnit::Seconds),
            other => Err(UnitError::UnknownUnit(other.to_string())),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// A physical time quantity, e.g. the sampling interval of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeQuantity {
    pub value: f64,
    pub unit: TimeUnit,
}

impl TimeQuantity {
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// Numerical value of this quantity expressed in `unit`.
    pub fn to(&self, unit: TimeUnit) -> f64 {
        self.value * 10f64.powi(self.unit.exponent() - unit.exponent())
    }
}

impl FromStr for TimeQuantity {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (value, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(value), Some(unit), None) => (value, unit),
            _ => return Err(UnitError::Malformed(s.to_string())),
        };
        let value: f64 = value
            .parse()
            .map_err(|_| UnitError::Malformed(s.to_string()))?;
        Ok(Self {
            value,
            unit: unit.parse()?,
        })
    }
}

impl fmt::Display for TimeQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}
