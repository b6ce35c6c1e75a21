use std::any::Any;
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pricescout_common::{
    Config, ExtractionStrategy, Ledger, PriceCell, PriceScoutError, PriceSummary, Query,
};

use crate::challenge::{is_challenge, ChallengeGate};
use crate::pipeline::listing::ListingExtractor;
use crate::pipeline::outliers::{apply_outliers, OutlierReducer};
use crate::pipeline::relevance::RelevanceFilter;
use crate::pipeline::stats::ScoutStats;
use crate::session::{BrowserSession, RenderedPage, SessionError};

/// Where one query's run got to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    #[default]
    Idle,
    PageLoaded,
    CaptchaPause,
    ListingsExtracted,
    Evaluated,
    Reduced,
    Summarized,
}

/// Side facts about one query's run, for stats and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryTrace {
    pub state: QueryState,
    pub challenges: u32,
    pub strategy: Option<&'static str>,
    pub dropped: usize,
    pub duplicates: usize,
    pub band_fell_back: bool,
}

impl QueryTrace {
    fn advance(&mut self, query: &str, next: QueryState) {
        debug!(query, from = ?self.state, to = ?next, "Query state");
        self.state = next;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub summary: PriceSummary,
    pub ledger: Ledger,
    pub trace: QueryTrace,
}

impl QueryOutcome {
    fn sentinel(query: &Query, cell: PriceCell, ledger: Ledger, trace: QueryTrace) -> Self {
        Self {
            summary: PriceSummary::sentinel(&query.text, cell),
            ledger,
            trace,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<QueryOutcome>,
    pub stats: ScoutStats,
    /// The batch stopped early; `outcomes` covers only the queries finished.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn summaries(&self) -> impl Iterator<Item = &PriceSummary> {
        self.outcomes.iter().map(|o| &o.summary)
    }
}

impl std::fmt::Display for BatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        writeln!(f, "Run {} ({}s)", self.run_id, elapsed.num_seconds())?;
        if self.cancelled {
            writeln!(f, "Cancelled after {} queries", self.outcomes.len())?;
        }
        write!(f, "{}", self.stats)
    }
}

/// Drives queries through render → extract → evaluate → reduce, one at a
/// time over a single browser session.
pub struct Scout {
    config: Config,
    session: Box<dyn BrowserSession>,
    gate: Box<dyn ChallengeGate>,
    extractor: ListingExtractor,
    filter: RelevanceFilter,
    reducer: OutlierReducer,
    cancel: CancellationToken,
}

impl Scout {
    pub fn new(
        config: Config,
        session: Box<dyn BrowserSession>,
        gate: Box<dyn ChallengeGate>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            extractor: ListingExtractor::from_config(&config),
            filter: RelevanceFilter::new(config.similarity_threshold),
            reducer: OutlierReducer::new(config.outlier_std_multiplier),
            config,
            session,
            gate,
            cancel,
        }
    }

    /// Run every query in order, then release the session. Never fails:
    /// per-query problems become sentinel cells and cancellation ends the
    /// batch early with whatever finished.
    pub async fn run_batch(self, queries: &[Query]) -> BatchReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            %run_id,
            queries = queries.len(),
            session = self.session.name(),
            similarity_threshold = self.filter.threshold(),
            "Starting price scout batch"
        );

        let mut outcomes = Vec::with_capacity(queries.len());
        let mut stats = ScoutStats::default();
        let mut cancelled = false;

        for (i, query) in queries.iter().enumerate() {
            if i > 0 && !self.pause_between_queries().await {
                cancelled = true;
                break;
            }
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            info!(query = query.text.as_str(), n = i + 1, of = queries.len(), "Processing query");

            let outcome = match AssertUnwindSafe(self.run_query(query)).catch_unwind().await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(PriceScoutError::Cancelled)) => {
                    warn!(query = query.text.as_str(), "Batch cancelled mid-query");
                    cancelled = true;
                    break;
                }
                Ok(Err(e)) => {
                    error!(query = query.text.as_str(), error = %e, "Query failed");
                    QueryOutcome::sentinel(
                        query,
                        PriceCell::UnexpectedError,
                        Ledger::new(),
                        QueryTrace::default(),
                    )
                }
                Err(panic) => {
                    error!(
                        query = query.text.as_str(),
                        panic = panic_message(&*panic),
                        "Query panicked"
                    );
                    QueryOutcome::sentinel(
                        query,
                        PriceCell::UnexpectedError,
                        Ledger::new(),
                        QueryTrace::default(),
                    )
                }
            };

            self.record(&mut stats, &outcome);
            outcomes.push(outcome);
        }

        self.session.close().await;

        BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            stats,
            cancelled,
        }
    }

    /// Run one query end to end. The only error is cancellation; every other
    /// failure is folded into the summary as a sentinel.
    pub async fn run_query(&self, query: &Query) -> Result<QueryOutcome, PriceScoutError> {
        let mut trace = QueryTrace::default();

        match self.process(query, &mut trace).await {
            Ok(outcome) => Ok(outcome),
            Err(PriceScoutError::Cancelled) => Err(PriceScoutError::Cancelled),
            Err(PriceScoutError::Timeout(url)) => {
                warn!(query = query.text.as_str(), url = url.as_str(), "Page load timed out");
                Ok(QueryOutcome::sentinel(query, PriceCell::Timeout, Ledger::new(), trace))
            }
            Err(e) => {
                error!(query = query.text.as_str(), error = %e, "Query failed");
                Ok(QueryOutcome::sentinel(
                    query,
                    PriceCell::UnexpectedError,
                    Ledger::new(),
                    trace,
                ))
            }
        }
    }

    async fn process(
        &self,
        query: &Query,
        trace: &mut QueryTrace,
    ) -> Result<QueryOutcome, PriceScoutError> {
        let q = query.text.as_str();
        let url = self.config.search_url(q);

        let mut page = self.load(&url).await?;
        trace.advance(q, QueryState::PageLoaded);

        while is_challenge(&page.url, &self.config.challenge_url_pattern) {
            trace.advance(q, QueryState::CaptchaPause);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(PriceScoutError::Cancelled),
                resolved = self.gate.wait_for_resolution(&page.url) => resolved?,
            }
            trace.challenges += 1;
            info!(query = q, "Challenge resolved, reloading search page");

            page = self.load(&url).await?;
            trace.advance(q, QueryState::PageLoaded);
        }

        if !self.extractor.page_ready(&page.html) {
            debug!(query = q, "Required price elements never appeared");
            return Err(PriceScoutError::Timeout(url));
        }

        let extraction = self.extractor.extract(&page.html, q);
        trace.strategy = extraction.strategy;
        trace.dropped = extraction.dropped;
        trace.duplicates = extraction.duplicates;
        trace.advance(q, QueryState::ListingsExtracted);
        info!(
            query = q,
            candidates = extraction.candidates.len(),
            dropped = extraction.dropped,
            strategy = extraction.strategy.unwrap_or("none"),
            "Listings extracted"
        );

        if extraction.candidates.is_empty() {
            trace.advance(q, QueryState::Summarized);
            return Ok(QueryOutcome::sentinel(
                query,
                PriceCell::NotFound,
                Ledger::new(),
                trace.clone(),
            ));
        }

        let mut ledger = Ledger::new();
        for candidate in extraction.candidates {
            ledger.push(self.filter.evaluate(query, candidate));
        }
        trace.advance(q, QueryState::Evaluated);

        let included = ledger.included_indices();
        let prices: Vec<Decimal> = included
            .iter()
            .map(|&i| ledger.entries()[i].candidate.price)
            .collect();

        let Some(reduction) = self.reducer.reduce(&prices) else {
            info!(query = q, candidates = ledger.len(), "No candidate passed relevance");
            trace.advance(q, QueryState::Summarized);
            return Ok(QueryOutcome::sentinel(query, PriceCell::NotFound, ledger, trace.clone()));
        };

        let outliers = apply_outliers(&mut ledger, &included, &reduction);
        trace.band_fell_back = reduction.fell_back;
        trace.advance(q, QueryState::Reduced);

        let summary = PriceSummary::found(q, reduction.min, reduction.max);
        trace.advance(q, QueryState::Summarized);
        info!(
            query = q,
            min = %summary.min_price,
            max = %summary.max_price,
            included = included.len() - outliers,
            outliers,
            "Query summarized"
        );

        Ok(QueryOutcome {
            summary,
            ledger,
            trace: trace.clone(),
        })
    }

    /// Render `url`, bounded by the page timeout and the cancellation token.
    async fn load(&self, url: &str) -> Result<RenderedPage, PriceScoutError> {
        let render = tokio::time::timeout(
            self.config.page_timeout,
            self.session.render(
                url,
                self.extractor.ready_selector(),
                self.config.page_timeout,
            ),
        );

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PriceScoutError::Cancelled),
            result = render => match result {
                Err(_) | Ok(Err(SessionError::Timeout)) => {
                    Err(PriceScoutError::Timeout(url.to_string()))
                }
                Ok(Err(SessionError::Failed(msg))) => Err(PriceScoutError::Session(msg)),
                Ok(Ok(page)) => Ok(page),
            },
        }
    }

    /// Fixed delay between queries. Returns false if cancelled while waiting.
    async fn pause_between_queries(&self) -> bool {
        let delay = self.config.query_delay;
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        debug!(delay_ms = delay.as_millis() as u64, "Pausing between queries");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn record(&self, stats: &mut ScoutStats, outcome: &QueryOutcome) {
        stats.record_outcome(&outcome.summary.min_price);
        stats.record_ledger(&outcome.ledger);
        stats.challenges_resolved += outcome.trace.challenges;
        stats.listings_dropped += outcome.trace.dropped as u32;
        stats.listings_deduplicated += outcome.trace.duplicates as u32;
        if outcome.trace.band_fell_back {
            stats.band_fallbacks += 1;
        }
        if outcome.trace.strategy == Some("titled-container")
            && self.config.extraction_strategy == ExtractionStrategy::Auto
        {
            stats.strategy_fallbacks += 1;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
