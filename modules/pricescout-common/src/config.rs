use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::PriceScoutError;
use crate::price::PriceEncoding;

/// Which listing layout(s) to try on a result page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionStrategy {
    /// Price elements labelled "Current price", title found on an ancestor.
    AriaLabel,
    /// Titled containers holding an image, price found in descendant text.
    TitledContainer,
    /// `AriaLabel` first, `TitledContainer` when it finds nothing.
    Auto,
}

impl FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aria-label" | "aria_label" | "aria" => Ok(ExtractionStrategy::AriaLabel),
            "titled-container" | "titled_container" | "container" => {
                Ok(ExtractionStrategy::TitledContainer)
            }
            "auto" => Ok(ExtractionStrategy::Auto),
            other => Err(format!(
                "unknown extraction strategy '{other}' (expected aria-label, titled-container or auto)"
            )),
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStrategy::AriaLabel => f.write_str("aria-label"),
            ExtractionStrategy::TitledContainer => f.write_str("titled-container"),
            ExtractionStrategy::Auto => f.write_str("auto"),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Rendering service
    pub browserless_url: String,
    pub browserless_token: Option<String>,

    // Search page
    pub search_url_template: String,
    pub link_base_url: String,
    pub challenge_url_pattern: String,

    // Extraction
    pub extraction_strategy: ExtractionStrategy,
    pub price_encoding: PriceEncoding,

    // Filtering
    pub similarity_threshold: f64,
    pub outlier_std_multiplier: f64,

    // Pacing
    pub page_timeout: Duration,
    pub query_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browserless_url: "http://localhost:3000".to_string(),
            browserless_token: None,
            search_url_template: "https://www.google.com/search?tbm=shop&q={query}".to_string(),
            link_base_url: "https://www.google.com".to_string(),
            challenge_url_pattern: "sorry/index".to_string(),
            extraction_strategy: ExtractionStrategy::Auto,
            price_encoding: PriceEncoding::IntegerCents,
            similarity_threshold: 0.01,
            outlier_std_multiplier: 1.0,
            page_timeout: Duration::from_secs(20),
            query_delay: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, PriceScoutError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PriceScoutError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            browserless_url: lookup("BROWSERLESS_URL").unwrap_or(defaults.browserless_url),
            browserless_token: lookup("BROWSERLESS_TOKEN").filter(|t| !t.is_empty()),
            search_url_template: lookup("SEARCH_URL_TEMPLATE")
                .unwrap_or(defaults.search_url_template),
            link_base_url: lookup("LINK_BASE_URL").unwrap_or(defaults.link_base_url),
            challenge_url_pattern: lookup("CHALLENGE_URL_PATTERN")
                .unwrap_or(defaults.challenge_url_pattern),
            extraction_strategy: parsed(&lookup, "EXTRACTION_STRATEGY")?
                .unwrap_or(defaults.extraction_strategy),
            price_encoding: parsed(&lookup, "PRICE_ENCODING")?.unwrap_or(defaults.price_encoding),
            similarity_threshold: parsed(&lookup, "SIMILARITY_THRESHOLD")?
                .unwrap_or(defaults.similarity_threshold),
            outlier_std_multiplier: parsed(&lookup, "OUTLIER_STD_MULTIPLIER")?
                .unwrap_or(defaults.outlier_std_multiplier),
            page_timeout: parsed::<u64, _>(&lookup, "PAGE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.page_timeout),
            query_delay: parsed::<u64, _>(&lookup, "QUERY_DELAY_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.query_delay),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PriceScoutError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(PriceScoutError::Config(format!(
                "SIMILARITY_THRESHOLD must be within [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !self.outlier_std_multiplier.is_finite() || self.outlier_std_multiplier < 0.0 {
            return Err(PriceScoutError::Config(format!(
                "OUTLIER_STD_MULTIPLIER must be >= 0, got {}",
                self.outlier_std_multiplier
            )));
        }
        if !self.search_url_template.contains("{query}") {
            return Err(PriceScoutError::Config(
                "SEARCH_URL_TEMPLATE must contain a {query} placeholder".to_string(),
            ));
        }
        if self.page_timeout.is_zero() {
            return Err(PriceScoutError::Config(
                "PAGE_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Search URL for a query: spaces become `+`, everything else reserved
    /// is percent-encoded.
    pub fn search_url(&self, query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        self.search_url_template.replace("{query}", &encoded)
    }

    /// Log the effective configuration without the Browserless token.
    pub fn log_redacted(&self) {
        let token = if self.browserless_token.is_some() { "[set]" } else { "[unset]" };
        info!(
            browserless_url = self.browserless_url.as_str(),
            browserless_token = token,
            search_url_template = self.search_url_template.as_str(),
            extraction_strategy = %self.extraction_strategy,
            price_encoding = %self.price_encoding,
            similarity_threshold = self.similarity_threshold,
            outlier_std_multiplier = self.outlier_std_multiplier,
            page_timeout_secs = self.page_timeout.as_secs(),
            query_delay_secs = self.query_delay.as_secs(),
            "Loaded configuration"
        );
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Result<Option<T>, PriceScoutError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| PriceScoutError::Config(format!("{key}: {e}"))),
    }
}
