use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::quantity::QuantitySpec;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A product description to price. The quantity is extracted once up front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub quantity: QuantitySpec,
}

impl Query {
    pub fn new(text: &str) -> Self {
        let text = text.trim().to_string();
        let quantity = QuantitySpec::extract_lenient(&text);
        Self { text, quantity }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// One scraped listing, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub price: Decimal,
    pub link: Option<String>,
    pub source_query: String,
    pub quantity: QuantitySpec,
}

// ---------------------------------------------------------------------------
// Evaluation + Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationStatus {
    Included,
    RejectedRelevance,
    RejectedOutlier,
}

impl fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationStatus::Included => f.write_str("included"),
            EvaluationStatus::RejectedRelevance => f.write_str("rejected (relevance)"),
            EvaluationStatus::RejectedOutlier => f.write_str("rejected (outlier)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub candidate: Candidate,
    pub similarity: f64,
    pub quantity_match: bool,
    pub status: EvaluationStatus,
    pub rejection_reason: Option<String>,
}

impl Evaluation {
    pub fn is_included(&self) -> bool {
        self.status == EvaluationStatus::Included
    }

    /// Similarity formatted as a percentage with two decimals, e.g. `87.50%`.
    pub fn similarity_percent(&self) -> String {
        format!("{:.2}%", self.similarity * 100.0)
    }
}

/// Every evaluation for one query, in extraction order, rejected ones included.
///
/// Append-only. The one permitted mutation is reclassifying an `Included`
/// entry as an outlier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    entries: Vec<Evaluation>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, evaluation: Evaluation) {
        self.entries.push(evaluation);
    }

    pub fn entries(&self) -> &[Evaluation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ledger indices of included entries, in order.
    pub fn included_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_included())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, status: EvaluationStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Reclassify entry `index` as an outlier. Returns `false` (and changes
    /// nothing) unless the entry is currently `Included`.
    pub fn mark_outlier(&mut self, index: usize, reason: String) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) if entry.is_included() => {
                entry.status = EvaluationStatus::RejectedOutlier;
                entry.rejection_reason = Some(reason);
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

/// A summary cell: an amount, or a sentinel explaining why there is none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PriceCell {
    Amount(Decimal),
    NotFound,
    Timeout,
    UnexpectedError,
}

impl fmt::Display for PriceCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceCell::Amount(d) => write!(f, "{:.2}", d),
            PriceCell::NotFound => f.write_str("not found"),
            PriceCell::Timeout => f.write_str("timeout"),
            PriceCell::UnexpectedError => f.write_str("unexpected error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSummary {
    pub query: String,
    pub min_price: PriceCell,
    pub max_price: PriceCell,
}

impl PriceSummary {
    pub fn found(query: &str, min: Decimal, max: Decimal) -> Self {
        Self {
            query: query.to_string(),
            min_price: PriceCell::Amount(min),
            max_price: PriceCell::Amount(max),
        }
    }

    /// Both cells carry the same sentinel.
    pub fn sentinel(query: &str, cell: PriceCell) -> Self {
        Self {
            query: query.to_string(),
            min_price: cell,
            max_price: cell,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self.min_price, PriceCell::Amount(_))
    }
}
