//! Package size extraction from free-text product descriptions.
//!
//! Finds the first `<number><unit>` run in a string ("Whey 1kg", "Shampoo
//! 400 ml", "Omega 3 120 caps") and normalizes it so listings written in
//! different units compare equal: kilograms become grams and liters become
//! milliliters, scaled by 1000. Capsule counts pass through as-is.
//!
//! No match is not an error. It yields [`QuantitySpec::Unspecified`], which
//! the relevance filter treats as "matches anything".

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d[\d.,]*)\s?(kg|g|ml|l|caps)\b").expect("valid quantity regex")
});

/// Normalized unit after scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Gram,
    Milliliter,
    /// Discrete count (capsules). Acts as a wildcard during matching.
    Count,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::Gram => "g",
            Unit::Milliliter => "ml",
            Unit::Count => "caps",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuantitySpec {
    Unspecified,
    Measured { magnitude: u64, unit: Unit },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityParseError {
    #[error("unparseable quantity magnitude '{0}'")]
    Magnitude(String),
}

impl QuantitySpec {
    /// Extract the first quantity in `text`.
    ///
    /// Returns `Err` only when the pattern matched but the number itself is
    /// garbage (e.g. `1.000,5kg`).
    pub fn extract(text: &str) -> Result<Self, QuantityParseError> {
        let Some(caps) = QUANTITY_RE.captures(text) else {
            return Ok(QuantitySpec::Unspecified);
        };

        let raw = &caps[1];
        let normalized = raw.replace(',', ".");
        let value = Decimal::from_str(normalized.trim_end_matches('.'))
            .map_err(|_| QuantityParseError::Magnitude(raw.to_string()))?;

        let (factor, unit) = match caps[2].to_ascii_lowercase().as_str() {
            "kg" => (1000, Unit::Gram),
            "g" => (1, Unit::Gram),
            "l" => (1000, Unit::Milliliter),
            "ml" => (1, Unit::Milliliter),
            _ => (1, Unit::Count),
        };

        let magnitude = value
            .checked_mul(Decimal::from(factor))
            .ok_or_else(|| QuantityParseError::Magnitude(raw.to_string()))?
            .trunc()
            .to_u64()
            .ok_or_else(|| QuantityParseError::Magnitude(raw.to_string()))?;

        Ok(QuantitySpec::Measured { magnitude, unit })
    }

    /// Like [`extract`](Self::extract), but a malformed magnitude degrades
    /// to `Unspecified`. Used for the query side, where dropping is not an
    /// option.
    pub fn extract_lenient(text: &str) -> Self {
        match Self::extract(text) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(text, error = %e, "Ignoring malformed quantity");
                QuantitySpec::Unspecified
            }
        }
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, QuantitySpec::Unspecified)
    }

    pub fn unit(&self) -> Option<Unit> {
        match self {
            QuantitySpec::Unspecified => None,
            QuantitySpec::Measured { unit, .. } => Some(*unit),
        }
    }
}

impl fmt::Display for QuantitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantitySpec::Unspecified => f.write_str("N/A"),
            QuantitySpec::Measured { magnitude, unit } => write!(f, "{magnitude}{unit}"),
        }
    }
}
