//! Mean ± k·σ outlier removal over the prices that passed relevance.

use pricescout_common::Ledger;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Below this many prices the band is not computed.
pub const MIN_PRICES_FOR_BAND: usize = 3;

/// Absorbs float rounding in the mean so identical prices are never outliers.
const BAND_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub mean: f64,
    pub std_dev: f64,
    pub lower: f64,
    pub upper: f64,
}

impl Band {
    pub fn contains(&self, price: f64) -> bool {
        let slack = BAND_EPSILON * self.mean.abs().max(1.0);
        price >= self.lower - slack && price <= self.upper + slack
    }
}

/// Outcome of reducing a price list to a (min, max) range.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub min: Decimal,
    pub max: Decimal,
    /// `None` when there were too few prices to compute one.
    pub band: Option<Band>,
    /// Positions (into the reduced slice) of prices outside the band.
    pub outliers: Vec<usize>,
    /// The band excluded everything; `min`/`max` come from the full list.
    pub fell_back: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct OutlierReducer {
    multiplier: f64,
}

impl Default for OutlierReducer {
    fn default() -> Self {
        Self { multiplier: 1.0 }
    }
}

impl OutlierReducer {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    /// Reduce `prices` to a representative range. `None` only for an empty slice.
    pub fn reduce(&self, prices: &[Decimal]) -> Option<Reduction> {
        let (min, max) = min_max(prices.iter().copied())?;

        if prices.len() < MIN_PRICES_FOR_BAND {
            return Some(Reduction {
                min,
                max,
                band: None,
                outliers: Vec::new(),
                fell_back: false,
            });
        }

        let values: Vec<f64> = prices.iter().map(|p| p.to_f64().unwrap_or(f64::NAN)).collect();
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        let band = Band {
            mean,
            std_dev,
            lower: mean - std_dev * self.multiplier,
            upper: mean + std_dev * self.multiplier,
        };

        let mut kept = Vec::with_capacity(prices.len());
        let mut outliers = Vec::new();
        for (i, (price, value)) in prices.iter().zip(&values).enumerate() {
            if band.contains(*value) {
                kept.push(*price);
            } else {
                outliers.push(i);
            }
        }

        info!(
            mean = %format!("{mean:.2}"),
            std_dev = %format!("{std_dev:.2}"),
            lower = %format!("{:.2}", band.lower),
            upper = %format!("{:.2}", band.upper),
            outliers = outliers.len(),
            "Outlier band computed"
        );

        let (min, max, fell_back) = match min_max(kept.into_iter()) {
            Some((lo, hi)) => (lo, hi, false),
            None => {
                warn!("Band excluded every price, falling back to full range");
                (min, max, true)
            }
        };

        Some(Reduction {
            min,
            max,
            band: Some(band),
            outliers,
            fell_back,
        })
    }
}

/// Reclassify the ledger entries behind each outlier.
///
/// `included` maps reduction positions back to ledger indices; it must be
/// the same index list the reduced prices were gathered from.
pub fn apply_outliers(ledger: &mut Ledger, included: &[usize], reduction: &Reduction) -> usize {
    let Some(band) = reduction.band else {
        return 0;
    };

    let mut marked = 0;
    for &pos in &reduction.outliers {
        let Some(&index) = included.get(pos) else {
            continue;
        };
        let Some(price) = ledger.entries().get(index).map(|e| e.candidate.price) else {
            continue;
        };
        let reason = format!(
            "price {:.2} outside band [{:.2}, {:.2}]",
            price, band.lower, band.upper
        );
        if ledger.mark_outlier(index, reason) {
            marked += 1;
        }
    }
    marked
}

fn min_max(prices: impl Iterator<Item = Decimal>) -> Option<(Decimal, Decimal)> {
    prices.fold(None, |acc, p| match acc {
        None => Some((p, p)),
        Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
    })
}
