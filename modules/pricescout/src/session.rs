use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, ContentRequest};
use thiserror::Error;
use tracing::{info, warn};

use pricescout_common::{Config, PriceScoutError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("page did not present expected content in time")]
    Timeout,

    #[error("render failed: {0}")]
    Failed(String),
}

impl From<BrowserlessError> for SessionError {
    fn from(err: BrowserlessError) -> Self {
        if err.is_timeout() {
            SessionError::Timeout
        } else {
            SessionError::Failed(err.to_string())
        }
    }
}

/// A page as the browser left it.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Where the browser ended up; differs from the requested URL on redirects
    /// (challenge pages included).
    pub url: String,
    pub html: String,
}

// --- BrowserSession trait ---

/// One browser, reused serially for every query in a batch.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` and wait up to `timeout` for `ready_selector` to appear.
    async fn render(
        &self,
        url: &str,
        ready_selector: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, SessionError>;

    /// Release the browser. Safe to call more than once.
    async fn close(&self);

    fn name(&self) -> &str;
}

// --- Browserless-backed session ---

pub struct BrowserlessSession {
    client: BrowserlessClient,
    closed: AtomicBool,
}

impl BrowserlessSession {
    /// Connect and probe the service. An unreachable browser is the one
    /// condition that aborts a batch before any query runs.
    pub async fn connect(config: &Config) -> Result<Self, PriceScoutError> {
        let client =
            BrowserlessClient::new(&config.browserless_url, config.browserless_token.as_deref())
                .map_err(|e| PriceScoutError::Session(e.to_string()))?;

        let version = client.version().await.map_err(|e| {
            PriceScoutError::Session(format!(
                "browser at {} unavailable: {e}",
                config.browserless_url
            ))
        })?;

        let browser = version
            .get("Browser")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(
            base_url = config.browserless_url.as_str(),
            browser,
            "Browser session acquired"
        );

        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    async fn render(
        &self,
        url: &str,
        ready_selector: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Failed("session already closed".to_string()));
        }

        info!(url, session = "browserless", "Rendering page");
        let request = ContentRequest::new(url, timeout).wait_for(ready_selector);
        let content = self.client.content_with(&request).await?;

        if content.html.is_empty() {
            warn!(url, session = "browserless", "Empty HTML response");
        }

        Ok(RenderedPage {
            url: content.final_url,
            html: content.html,
        })
    }

    async fn close(&self) {
        // /content requests are stateless on the Browserless side; there is
        // no remote handle to tear down, only further use to refuse.
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(session = "browserless", "Browser session released");
        }
    }

    fn name(&self) -> &str {
        "browserless"
    }
}
