//! Shared HTTP fetcher for every extraction strategy.
//!
//! One `reqwest::Client` (connection pool, user agent, default timeout) is
//! shared by all sources. Every request first waits for a token from a
//! per-host bucket, so concurrent sources that hit the same upstream host are
//! throttled together.

use crate::config::ExtractionSettings;
use crate::error::ExtractError;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};
use url::Url;

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher").finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(settings: &ExtractionSettings) -> Result<Self, ExtractError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.request_timeout())
            .build()?;
        let per_second =
            NonZeroU32::new(settings.host_requests_per_second).unwrap_or(NonZeroU32::MIN);
        Ok(Self {
            client,
            limiter: Arc::new(RateLimiter::keyed(Quota::per_second(per_second))),
        })
    }

    /// The underlying client, for API clients that build their own requests.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Wait until the bucket of `url`'s host has a token.
    pub async fn wait_for_host(&self, url: &Url) {
        let host = url.host_str().unwrap_or_default().to_string();
        self.limiter.until_key_ready(&host).await;
    }

    /// GET `url` and return the body as text. Non-2xx statuses are errors.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&self, url: &str, timeout: Duration) -> Result<String, ExtractError> {
        let parsed = parse_url(url)?;
        self.wait_for_host(&parsed).await;

        let t0 = Instant::now();
        let body = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched page"
        );
        Ok(body)
    }
}

pub fn parse_url(url: &str) -> Result<Url, ExtractError> {
    Url::parse(url).map_err(|e| ExtractError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_get_text_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hello</p>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&ExtractionSettings::without_delays()).unwrap();
        let body = fetcher
            .get_text(&format!("{}/page", server.uri()), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(body, "<p>hello</p>");
    }

    #[tokio::test]
    async fn test_get_text_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(&ExtractionSettings::without_delays()).unwrap();
        let err = fetcher
            .get_text(&format!("{}/down", server.uri()), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Http(_)));
    }

    #[tokio::test]
    async fn test_get_text_rejects_invalid_url() {
        let fetcher = Fetcher::new(&ExtractionSettings::without_delays()).unwrap();
        let err = fetcher.get_text("not a url", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ExtractError::InvalidUrl { .. }));
    }
}
