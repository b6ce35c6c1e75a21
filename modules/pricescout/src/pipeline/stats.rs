use pricescout_common::{EvaluationStatus, Ledger, PriceCell};
use serde::Serialize;

/// Stats from a batch run.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ScoutStats {
    pub queries_total: u32,
    pub queries_priced: u32,
    pub queries_not_found: u32,
    pub queries_timed_out: u32,
    pub queries_failed: u32,
    pub challenges_resolved: u32,
    pub listings_dropped: u32,
    pub listings_deduplicated: u32,
    pub candidates_extracted: u32,
    pub candidates_included: u32,
    pub rejected_relevance: u32,
    pub rejected_outlier: u32,
    pub band_fallbacks: u32,
    pub strategy_fallbacks: u32,
}

impl ScoutStats {
    /// Count a finished query by the cell its minimum price landed in.
    pub fn record_outcome(&mut self, cell: &PriceCell) {
        self.queries_total += 1;
        match cell {
            PriceCell::Amount(_) => self.queries_priced += 1,
            PriceCell::NotFound => self.queries_not_found += 1,
            PriceCell::Timeout => self.queries_timed_out += 1,
            PriceCell::UnexpectedError => self.queries_failed += 1,
        }
    }

    pub fn record_ledger(&mut self, ledger: &Ledger) {
        self.candidates_extracted += ledger.len() as u32;
        self.candidates_included += ledger.count(EvaluationStatus::Included) as u32;
        self.rejected_relevance += ledger.count(EvaluationStatus::RejectedRelevance) as u32;
        self.rejected_outlier += ledger.count(EvaluationStatus::RejectedOutlier) as u32;
    }
}

impl std::fmt::Display for ScoutStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Price Scout Run Complete ===")?;
        writeln!(f, "Queries:            {}", self.queries_total)?;
        writeln!(f, "  Priced:           {}", self.queries_priced)?;
        writeln!(f, "  Not found:        {}", self.queries_not_found)?;
        writeln!(f, "  Timed out:        {}", self.queries_timed_out)?;
        writeln!(f, "  Failed:           {}", self.queries_failed)?;
        writeln!(f, "Challenges solved:  {}", self.challenges_resolved)?;
        writeln!(f, "\nCandidates:         {}", self.candidates_extracted)?;
        writeln!(f, "  Included:         {}", self.candidates_included)?;
        writeln!(f, "  Low relevance:    {}", self.rejected_relevance)?;
        writeln!(f, "  Price outliers:   {}", self.rejected_outlier)?;
        writeln!(f, "Listings dropped:   {}", self.listings_dropped)?;
        writeln!(f, "Listings deduped:   {}", self.listings_deduplicated)?;
        if self.band_fallbacks > 0 || self.strategy_fallbacks > 0 {
            writeln!(f, "\nFallbacks:")?;
            writeln!(f, "  Outlier band:     {}", self.band_fallbacks)?;
            writeln!(f, "  Layout strategy:  {}", self.strategy_fallbacks)?;
        }
        let total = self.queries_total.max(1);
        write!(
            f,
            "\nHit rate: {:.0}%",
            self.queries_priced as f64 / total as f64 * 100.0
        )
    }
}
