//! Does a scraped listing describe the product that was searched for?
//!
//! Two checks, both must pass:
//! 1. Name similarity (Jaro-Winkler, case-folded) at or above a threshold.
//! 2. Package size agreement: the query has no quantity, or the listing's
//!    normalized quantity equals the query's, or the listing is counted in
//!    capsules (wildcard).

use pricescout_common::{Candidate, Evaluation, EvaluationStatus, Query, QuantitySpec, Unit};
use tracing::debug;

/// Case-insensitive Jaro-Winkler similarity in `[0, 1]`. Identical strings score 1.0.
pub fn similarity(query: &str, name: &str) -> f64 {
    strsim::jaro_winkler(&query.to_lowercase(), &name.to_lowercase())
}

/// Quantity agreement between what was asked for and what was found.
pub fn quantity_matches(query: &QuantitySpec, candidate: &QuantitySpec) -> bool {
    query.is_unspecified() || query == candidate || candidate.unit() == Some(Unit::Count)
}

#[derive(Debug, Clone, Copy)]
pub struct RelevanceFilter {
    threshold: f64,
}

impl RelevanceFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Score one candidate. Always returns an evaluation; rejection is a
    /// status, not an error.
    pub fn evaluate(&self, query: &Query, candidate: Candidate) -> Evaluation {
        let score = similarity(&query.text, &candidate.name);
        let quantity_match = quantity_matches(&query.quantity, &candidate.quantity);

        let rejection_reason = if score < self.threshold {
            Some(format!(
                "low similarity to '{}' ({:.2}%)",
                query.text,
                score * 100.0
            ))
        } else if !quantity_match {
            Some(format!(
                "quantity/unit mismatch (expected: {}, found: {})",
                query.quantity, candidate.quantity
            ))
        } else {
            None
        };

        let status = if rejection_reason.is_some() {
            EvaluationStatus::RejectedRelevance
        } else {
            EvaluationStatus::Included
        };

        debug!(
            query = query.text.as_str(),
            name = candidate.name.as_str(),
            price = %candidate.price,
            similarity = score,
            quantity_match,
            %status,
            "Evaluated candidate"
        );

        Evaluation {
            candidate,
            similarity: score,
            quantity_match,
            status,
            rejection_reason,
        }
    }
}
