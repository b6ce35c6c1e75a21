pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

/// Extra headroom on top of the page timeout before the HTTP request itself
/// is abandoned. Browserless answers 408 on its own once `waitForSelector`
/// expires; this only catches a stalled connection.
const REQUEST_SLACK: Duration = Duration::from_secs(10);

/// Header Browserless sets to the URL the page ended up on after redirects.
const RESPONSE_URL_HEADER: &str = "x-response-url";

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Body of a `/content` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<WaitForSelector>,
    pub goto_options: GotoOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitForSelector {
    pub selector: String,
    /// Milliseconds.
    pub timeout: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoOptions {
    /// Milliseconds.
    pub timeout: u64,
    pub wait_until: String,
}

impl ContentRequest {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            wait_for_selector: None,
            goto_options: GotoOptions {
                timeout: timeout.as_millis() as u64,
                wait_until: "domcontentloaded".to_string(),
            },
        }
    }

    pub fn wait_for(mut self, selector: &str) -> Self {
        self.wait_for_selector = Some(WaitForSelector {
            selector: selector.to_string(),
            timeout: self.goto_options.timeout,
        });
        self
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.goto_options.timeout) * 2 + REQUEST_SLACK
    }
}

/// Rendered HTML plus the URL the browser settled on.
#[derive(Debug, Clone)]
pub struct RenderedContent {
    pub html: String,
    pub final_url: String,
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let mut endpoint = format!("{}{}", self.base_url, path);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    /// Probe the service. Used once at startup so an unreachable browser
    /// fails fast instead of per query.
    pub async fn version(&self) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(self.endpoint("/json/version"))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    /// Fetch fully-rendered HTML for a URL via the Browserless /content endpoint.
    ///
    /// A 408 from Browserless (selector never appeared) and a client-side
    /// timeout both surface as [`BrowserlessError::Timeout`].
    pub async fn content_with(&self, request: &ContentRequest) -> Result<RenderedContent> {
        debug!(url = request.url.as_str(), "Browserless content request");

        let resp = self
            .client
            .post(self.endpoint("/content"))
            .header("Content-Type", "application/json")
            .timeout(request.request_timeout())
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::REQUEST_TIMEOUT {
            return Err(BrowserlessError::Timeout);
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let final_url = resp
            .headers()
            .get(RESPONSE_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| request.url.clone());

        Ok(RenderedContent {
            html: resp.text().await?,
            final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_request_serializes_camel_case() {
        let req = ContentRequest::new("https://example.com", Duration::from_secs(20))
            .wait_for("div[aria-label^=\"Current price\"]");
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["url"], "https://example.com");
        assert_eq!(json["gotoOptions"]["timeout"], 20_000);
        assert_eq!(json["gotoOptions"]["waitUntil"], "domcontentloaded");
        assert_eq!(json["waitForSelector"]["timeout"], 20_000);
        assert_eq!(
            json["waitForSelector"]["selector"],
            "div[aria-label^=\"Current price\"]"
        );
    }

    #[test]
    fn wait_for_selector_omitted_when_unset() {
        let req = ContentRequest::new("https://example.com", Duration::from_secs(5));
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("waitForSelector").is_none());
    }

    #[test]
    fn endpoint_appends_token() {
        let client = BrowserlessClient::new("http://localhost:3000/", Some("abc")).unwrap();
        assert_eq!(
            client.endpoint("/content"),
            "http://localhost:3000/content?token=abc"
        );

        let anon = BrowserlessClient::new("http://localhost:3000", None).unwrap();
        assert_eq!(anon.endpoint("/json/version"), "http://localhost:3000/json/version");
    }

    #[test]
    fn timeout_error_is_flagged() {
        assert!(BrowserlessError::Timeout.is_timeout());
        assert!(!BrowserlessError::Network("reset".into()).is_timeout());
    }
}
