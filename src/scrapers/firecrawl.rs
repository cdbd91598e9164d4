//! Client for the Firecrawl v1 scrape endpoint and the cooldown retry policy
//! wrapped around it.
//!
//! The crawl strategy only depends on the [`CrawlApi`] and [`Pause`] traits,
//! so retry behavior can be exercised with in-memory fakes and no real delays.

use super::http::{Fetcher, parse_url};
use crate::error::{CrawlError, ExtractError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

/// One page as returned by the crawling service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CrawledPage {
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A service that renders a URL into markdown, HTML and metadata.
pub trait CrawlApi {
    async fn scrape(&self, url: &str) -> Result<CrawledPage, CrawlError>;
}

/// A way to wait. Production code sleeps; tests record the request.
pub trait Pause {
    async fn pause(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPause;

impl Pause for TokioPause {
    async fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            sleep(duration).await;
        }
    }
}

/// Bounded retry for rate-limited calls: after a rate-limit error, pause for
/// `cooldown` and try again, at most `max_attempts` calls in total. Other
/// errors are returned immediately.
#[derive(Debug, Clone)]
pub struct CooldownRetry<P> {
    cooldown: Duration,
    max_attempts: u32,
    pause: P,
}

impl<P: Pause> CooldownRetry<P> {
    pub fn new(cooldown: Duration, max_attempts: u32, pause: P) -> Self {
        Self {
            cooldown,
            max_attempts: max_attempts.max(1),
            pause,
        }
    }

    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, CrawlError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CrawlError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_rate_limited() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Rate limited; cooling down before retry"
                    );
                    self.pause.pause(self.cooldown).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'a str; 2],
}

#[derive(Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    data: Option<CrawledPage>,
    error: Option<String>,
}

fn mentions_rate_limit(text: &str) -> bool {
    let text = text.to_lowercase();
    text.contains("rate limit") || text.contains("too many requests")
}

#[derive(Debug, Clone)]
pub struct FirecrawlClient {
    fetcher: Fetcher,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl FirecrawlClient {
    pub fn new(
        fetcher: Fetcher,
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExtractError> {
        let endpoint = format!("{}/v1/scrape", base_url.trim_end_matches('/'));
        parse_url(&endpoint)?;
        Ok(Self {
            fetcher,
            endpoint,
            api_key: api_key.into(),
            timeout,
        })
    }
}

impl CrawlApi for FirecrawlClient {
    #[instrument(level = "debug", skip(self))]
    async fn scrape(&self, url: &str) -> Result<CrawledPage, CrawlError> {
        if let Ok(endpoint) = url::Url::parse(&self.endpoint) {
            self.fetcher.wait_for_host(&endpoint).await;
        }

        let resp = self
            .fetcher
            .client()
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&ScrapeRequest {
                url,
                formats: ["markdown", "html"],
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CrawlError::RateLimited(body));
        }
        if !status.is_success() {
            return Err(if mentions_rate_limit(&body) {
                CrawlError::RateLimited(body)
            } else {
                CrawlError::Api(format!("{status}: {body}"))
            });
        }

        let parsed: ScrapeResponse = serde_json::from_str(&body)
            .map_err(|e| CrawlError::Api(format!("unexpected response: {e}")))?;
        match (parsed.success, parsed.data) {
            (true, Some(page)) => {
                debug!(
                    markdown_chars = page.markdown.len(),
                    html_chars = page.html.len(),
                    "Crawled page"
                );
                Ok(page)
            }
            _ => {
                let message = parsed.error.unwrap_or_else(|| "no data returned".into());
                Err(if mentions_rate_limit(&message) {
                    CrawlError::RateLimited(message)
                } else {
                    CrawlError::Api(message)
                })
            }
        }
    }
}
