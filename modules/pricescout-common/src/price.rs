//! Scraped price text → exact decimal amount.
//!
//! The result page has used two encodings over time, and the wrong guess
//! silently shifts prices by a factor of 100, so the mode is always explicit:
//!
//! - [`PriceEncoding::DecimalComma`]: Brazilian Real text, `.` groups
//!   thousands and `,` is the decimal separator (`R$ 1.234,56`).
//! - [`PriceEncoding::IntegerCents`]: every separator is decoration and the
//!   digit run is an amount in cents (`R$ 45,90` → `4590` → `45.90`).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

static NUMERIC_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.,]*").expect("valid numeric run regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriceEncoding {
    DecimalComma,
    IntegerCents,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriceParseError {
    #[error("no digits in price text")]
    NoDigits,
    #[error("malformed price '{0}'")]
    Malformed(String),
    #[error("price is zero")]
    Zero,
}

impl PriceEncoding {
    /// Parse the first numeric run in `raw` under this encoding.
    pub fn parse(&self, raw: &str) -> Result<Decimal, PriceParseError> {
        let run = NUMERIC_RUN_RE
            .find(raw)
            .map(|m| m.as_str().trim_end_matches(['.', ',']))
            .ok_or(PriceParseError::NoDigits)?;

        let amount = match self {
            PriceEncoding::DecimalComma => {
                let normalized = run.replace('.', "").replace(',', ".");
                Decimal::from_str(&normalized)
                    .map_err(|_| PriceParseError::Malformed(run.to_string()))?
            }
            PriceEncoding::IntegerCents => {
                let digits: String = run.chars().filter(char::is_ascii_digit).collect();
                let cents: i64 = digits
                    .parse()
                    .map_err(|_| PriceParseError::Malformed(run.to_string()))?;
                Decimal::new(cents, 2)
            }
        };

        if amount.is_zero() {
            return Err(PriceParseError::Zero);
        }
        Ok(amount)
    }
}

/// Convenience wrapper: any parse failure means "no price".
pub fn parse_price(raw: &str, encoding: PriceEncoding) -> Option<Decimal> {
    encoding.parse(raw).ok()
}

impl FromStr for PriceEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decimal-comma" | "decimal_comma" => Ok(PriceEncoding::DecimalComma),
            "integer-cents" | "integer_cents" | "cents" => Ok(PriceEncoding::IntegerCents),
            other => Err(format!(
                "unknown price encoding '{other}' (expected decimal-comma or integer-cents)"
            )),
        }
    }
}

impl fmt::Display for PriceEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceEncoding::DecimalComma => f.write_str("decimal-comma"),
            PriceEncoding::IntegerCents => f.write_str("integer-cents"),
        }
    }
}
