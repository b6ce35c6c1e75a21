// Test mocks for the price scout.
//
// Two mocks matching the two async trait boundaries:
// - MockSession (BrowserSession): per-URL queue of scripted responses,
//   honouring the ready selector the way the browser does
// - MockGate (ChallengeGate): resolves, hangs, or fails on demand
//
// Plus builders for result-page HTML and a quiet test config.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use pricescout_common::{Config, ExtractionStrategy, PriceEncoding, PriceScoutError};

use crate::challenge::ChallengeGate;
use crate::session::{BrowserSession, RenderedPage, SessionError};

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

pub const TEST_SEARCH_TEMPLATE: &str = "https://shop.test/search?q={query}";
pub const TEST_LINK_BASE: &str = "https://shop.test";
pub const TEST_CHALLENGE_URL: &str = "https://shop.test/sorry/index?continue=1";

/// Config pointed at the mock site: no inter-query delay, short timeout,
/// decimal-comma prices.
pub fn test_config() -> Config {
    Config {
        search_url_template: TEST_SEARCH_TEMPLATE.to_string(),
        link_base_url: TEST_LINK_BASE.to_string(),
        extraction_strategy: ExtractionStrategy::Auto,
        price_encoding: PriceEncoding::DecimalComma,
        similarity_threshold: 0.5,
        page_timeout: Duration::from_millis(200),
        query_delay: Duration::ZERO,
        ..Config::default()
    }
}

// ---------------------------------------------------------------------------
// MockSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockResponse {
    Page { final_url: String, html: String },
    Timeout,
    Fail(String),
    /// Never completes; exercises the scout's own timeout and cancellation.
    Hang,
    Panic,
}

#[derive(Default)]
struct SessionState {
    responses: HashMap<String, VecDeque<MockResponse>>,
    renders: Vec<String>,
    closes: u32,
}

/// Scripted browser session. Each URL owns a queue of responses consumed in
/// order; an unregistered or exhausted URL fails the render. Clones share
/// state, so a test can keep a handle after boxing one into a `Scout`.
#[derive(Clone, Default)]
pub struct MockSession {
    state: Arc<Mutex<SessionState>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, url: &str, response: MockResponse) -> Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .entry(url.to_string())
            .or_default()
            .push_back(response);
        self
    }

    pub fn on_page(self, url: &str, html: &str) -> Self {
        self.push(
            url,
            MockResponse::Page {
                final_url: url.to_string(),
                html: html.to_string(),
            },
        )
    }

    /// The browser lands on the challenge page instead of `url`.
    pub fn on_challenge(self, url: &str) -> Self {
        self.push(
            url,
            MockResponse::Page {
                final_url: TEST_CHALLENGE_URL.to_string(),
                html: "<html><body><form id=\"captcha-form\"></form></body></html>".to_string(),
            },
        )
    }

    pub fn on_timeout(self, url: &str) -> Self {
        self.push(url, MockResponse::Timeout)
    }

    pub fn on_failure(self, url: &str, message: &str) -> Self {
        self.push(url, MockResponse::Fail(message.to_string()))
    }

    pub fn on_hang(self, url: &str) -> Self {
        self.push(url, MockResponse::Hang)
    }

    pub fn on_panic(self, url: &str) -> Self {
        self.push(url, MockResponse::Panic)
    }

    /// URLs rendered so far, in order.
    pub fn renders(&self) -> Vec<String> {
        self.state.lock().unwrap().renders.clone()
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().unwrap().closes
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn render(
        &self,
        url: &str,
        ready_selector: &str,
        _timeout: Duration,
    ) -> Result<RenderedPage, SessionError> {
        // Lock released before any await or panic below.
        let next = {
            let mut state = self.state.lock().unwrap();
            state.renders.push(url.to_string());
            state.responses.get_mut(url).and_then(|q| q.pop_front())
        };

        match next {
            // Like the real browser: a page that never shows the ready
            // selector is a timeout, whatever its URL.
            Some(MockResponse::Page { final_url, html }) => {
                if has_element(&html, ready_selector) {
                    Ok(RenderedPage {
                        url: final_url,
                        html,
                    })
                } else {
                    Err(SessionError::Timeout)
                }
            }
            Some(MockResponse::Timeout) => Err(SessionError::Timeout),
            Some(MockResponse::Fail(msg)) => Err(SessionError::Failed(msg)),
            Some(MockResponse::Hang) => futures::future::pending().await,
            Some(MockResponse::Panic) => panic!("MockSession: scripted panic for {url}"),
            None => Err(SessionError::Failed(format!(
                "MockSession: no response registered for {url}"
            ))),
        }
    }

    async fn close(&self) {
        self.state.lock().unwrap().closes += 1;
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn has_element(html: &str, selector: &str) -> bool {
    let selector = Selector::parse(selector).unwrap();
    Html::parse_document(html).select(&selector).next().is_some()
}

// ---------------------------------------------------------------------------
// MockGate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GateBehavior {
    #[default]
    Resolve,
    Hang,
    Fail,
}

#[derive(Clone, Default)]
pub struct MockGate {
    behavior: GateBehavior,
    waits: Arc<Mutex<Vec<String>>>,
}

impl MockGate {
    pub fn resolving() -> Self {
        Self::default()
    }

    pub fn hanging() -> Self {
        Self {
            behavior: GateBehavior::Hang,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            behavior: GateBehavior::Fail,
            ..Self::default()
        }
    }

    /// Challenge URLs the gate was asked to wait on.
    pub fn waits(&self) -> Vec<String> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChallengeGate for MockGate {
    async fn wait_for_resolution(&self, url: &str) -> Result<(), PriceScoutError> {
        self.waits.lock().unwrap().push(url.to_string());
        match self.behavior {
            GateBehavior::Resolve => Ok(()),
            GateBehavior::Hang => futures::future::pending().await,
            GateBehavior::Fail => Err(PriceScoutError::Challenge(format!(
                "MockGate: no resume for {url}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// HTML builders
// ---------------------------------------------------------------------------

/// A result card in the aria-label layout. `price` is the visible amount,
/// e.g. `"R$ 45,90"`.
pub fn aria_card(name: &str, price: &str, href: &str) -> String {
    format!(
        r#"<a href="{href}"><div class="card"><div title="{name}">{name}</div><div class="row"><span aria-label="Current price: {price}">{price}</span></div></div></a>"#
    )
}

/// A result card in the titled-container layout.
pub fn container_card(name: &str, price: &str, href: &str) -> String {
    format!(
        r#"<div title="{name}"><img src="thumb.png"><span>{name}</span><span>{price}</span><a href="{href}">loja</a></div>"#
    )
}

pub fn results_page(cards: &[String]) -> String {
    format!(
        "<html><head><title>Shopping</title></head><body><div id=\"rso\">{}</div></body></html>",
        cards.concat()
    )
}
