//! Unit conversion utilities
//!
//! Geometry is always held in millimeters. Conversion to the controller's
//! native unit happens once per program through [`Units::factor_from_mm`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Millimeters per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Controller unit system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    /// Millimeters (G21)
    #[default]
    #[serde(alias = "mm")]
    Millimeters,
    /// Inches (G20)
    #[serde(alias = "inch", alias = "in")]
    Inches,
}

impl Units {
    /// Multiplier that converts a millimeter value into this unit
    pub fn factor_from_mm(&self) -> f64 {
        match self {
            Self::Millimeters => 1.0,
            Self::Inches => 1.0 / MM_PER_INCH,
        }
    }

    /// The modal G-code word that selects this unit
    pub fn gcode_word(&self) -> &'static str {
        match self {
            Self::Millimeters => "G21",
            Self::Inches => "G20",
        }
    }

    /// Short unit label
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Self::Millimeters => "mm",
            Self::Inches => "in",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mm" | "millimeters" | "metric" => Ok(Self::Millimeters),
            "in" | "inch" | "inches" | "imperial" => Ok(Self::Inches),
            _ => Err(format!("Unknown units: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factor() {
        assert_eq!(Units::Millimeters.factor_from_mm(), 1.0);
        assert!((25.4 * Units::Inches.factor_from_mm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse() {
        assert_eq!("mm".parse::<Units>(), Ok(Units::Millimeters));
        assert_eq!("Inch".parse::<Units>(), Ok(Units::Inches));
        assert!("furlong".parse::<Units>().is_err());
    }
}
