//! Extraction layer: one strategy per source kind, all producing [`Article`]s.
//!
//! # Strategies
//!
//! | Kind | Module | Method | Notes |
//! |------|--------|--------|-------|
//! | `feed` | [`feed`] | RSS / Atom | Best-effort full-article fetch, falls back to the summary |
//! | `scrape` | [`scrape`] | HTML listing page | Per-site profiles routed by URL |
//! | `crawl` | [`crawl`] | Crawling API | Needs an API key; cooldown retry on rate limits |
//!
//! # Dispatch
//!
//! [`extract_all`] runs sources concurrently through a bounded pool and keeps
//! one result slot per source, so output follows source order. A failing
//! source contributes zero articles and is recorded in the
//! [`ExtractionReport`]; it never aborts the batch.

pub mod crawl;
pub mod feed;
pub mod firecrawl;
pub mod html;
pub mod http;
pub mod scrape;

use crate::config::ExtractionSettings;
use crate::error::ExtractError;
use crate::models::{Article, SourceDescriptor, SourceKind};
use crawl::CrawlStrategy;
use feed::FeedStrategy;
use firecrawl::{FirecrawlClient, TokioPause};
use futures::stream::{self, StreamExt};
use http::Fetcher;
use scrape::ScrapeStrategy;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// Deadline and abort flag shared by every source of a run.
///
/// Strategies check it between items and stop early, keeping what they have.
#[derive(Debug, Clone)]
pub struct RunBudget {
    deadline: Option<tokio::time::Instant>,
    aborted: Arc<AtomicBool>,
}

impl RunBudget {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            deadline: timeout.map(|t| tokio::time::Instant::now() + t),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_exhausted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
            || self
                .deadline
                .is_some_and(|d| tokio::time::Instant::now() >= d)
    }
}

/// Everything a strategy needs besides its source descriptor.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub fetcher: Fetcher,
    pub settings: ExtractionSettings,
    pub crawl_api_key: Option<String>,
    pub budget: RunBudget,
}

impl ExtractionContext {
    pub fn new(
        settings: ExtractionSettings,
        crawl_api_key: Option<String>,
        budget: RunBudget,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            fetcher: Fetcher::new(&settings)?,
            settings,
            crawl_api_key: crawl_api_key.filter(|k| !k.trim().is_empty()),
            budget,
        })
    }

    #[cfg(test)]
    pub fn for_tests(settings: ExtractionSettings) -> Self {
        Self::new(settings, None, RunBudget::unlimited()).unwrap()
    }
}

/// The strategy chosen for one source.
#[derive(Debug)]
pub enum Strategy {
    Feed(FeedStrategy),
    Scrape(ScrapeStrategy),
    Crawl(CrawlStrategy<FirecrawlClient, TokioPause>),
}

impl Strategy {
    /// Build the strategy for `source`. Returns `Ok(None)` for kinds no
    /// strategy handles.
    pub fn for_source(
        source: &SourceDescriptor,
        ctx: &ExtractionContext,
    ) -> Result<Option<Self>, ExtractError> {
        let strategy = match &source.kind {
            SourceKind::Feed => Strategy::Feed(FeedStrategy::new(source.clone())),
            SourceKind::Scrape => Strategy::Scrape(ScrapeStrategy::new(source.clone())),
            SourceKind::Crawl => {
                let key = ctx.crawl_api_key.as_deref().ok_or_else(|| {
                    ExtractError::MissingCredentials("FIRECRAWL_API_KEY is not set".into())
                })?;
                let client = FirecrawlClient::new(
                    ctx.fetcher.clone(),
                    &ctx.settings.crawl_api_base_url,
                    key,
                    ctx.settings.request_timeout(),
                )?;
                Strategy::Crawl(CrawlStrategy::new(
                    source.clone(),
                    client,
                    TokioPause,
                    &ctx.settings,
                ))
            }
            SourceKind::Unrecognized(_) => return Ok(None),
        };
        Ok(Some(strategy))
    }

    pub async fn extract(&self, ctx: &ExtractionContext) -> Result<Vec<Article>, ExtractError> {
        match self {
            Strategy::Feed(s) => s.extract(ctx).await,
            Strategy::Scrape(s) => s.extract(ctx).await,
            Strategy::Crawl(s) => s.extract(ctx).await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Ok,
    Skipped(String),
    Failed(String),
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Ok => write!(f, "ok"),
            SourceStatus::Skipped(reason) => write!(f, "skipped: {reason}"),
            SourceStatus::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    pub kind: SourceKind,
    pub articles: usize,
    pub status: SourceStatus,
}

#[derive(Debug, Default)]
pub struct ExtractionReport {
    pub articles: Vec<Article>,
    pub outcomes: Vec<SourceOutcome>,
}

impl ExtractionReport {
    pub fn failed_sources(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, SourceStatus::Failed(_)))
            .count()
    }
}

async fn extract_source(
    source: &SourceDescriptor,
    ctx: &ExtractionContext,
) -> (SourceOutcome, Vec<Article>) {
    let outcome = |articles: usize, status: SourceStatus| SourceOutcome {
        source: source.name.clone(),
        kind: source.kind.clone(),
        articles,
        status,
    };

    if ctx.budget.is_exhausted() {
        warn!(source = %source.name, "Run budget exhausted; source not started");
        return (outcome(0, SourceStatus::Skipped("run budget exhausted".into())), Vec::new());
    }

    let strategy = match Strategy::for_source(source, ctx) {
        Ok(Some(strategy)) => strategy,
        Ok(None) => {
            warn!(source = %source.name, kind = %source.kind, "Unknown source kind; skipping");
            return (
                outcome(0, SourceStatus::Skipped(format!("unknown kind {}", source.kind))),
                Vec::new(),
            );
        }
        Err(e) => {
            error!(source = %source.name, error = %e, "Could not set up source");
            return (outcome(0, SourceStatus::Failed(e.to_string())), Vec::new());
        }
    };

    match strategy.extract(ctx).await {
        Ok(articles) => (outcome(articles.len(), SourceStatus::Ok), articles),
        Err(e) => {
            error!(source = %source.name, kind = %source.kind, error = %e, "Source extraction failed");
            (outcome(0, SourceStatus::Failed(e.to_string())), Vec::new())
        }
    }
}

/// Extract every source and concatenate the results in source order.
///
/// A failing or unsupported source is logged and recorded in the report; it
/// never stops the other sources.
///
/// # Arguments
///
/// * `sources` - Configured sources, in the order their articles should appear
/// * `ctx` - Shared fetcher, settings, crawl key and run budget
///
/// # Returns
///
/// An [`ExtractionReport`] with the concatenated articles and one
/// [`SourceOutcome`] per source.
#[instrument(level = "info", skip_all, fields(sources = sources.len()))]
pub async fn extract_all(sources: &[SourceDescriptor], ctx: &ExtractionContext) -> ExtractionReport {
    let t0 = Instant::now();
    let width = ctx.settings.max_concurrent_sources.max(1);

    let results: Vec<(SourceOutcome, Vec<Article>)> = stream::iter(sources)
        .map(|source| extract_source(source, ctx))
        .buffered(width)
        .collect()
        .await;

    let mut report = ExtractionReport::default();
    for (outcome, articles) in results {
        info!(
            source = %outcome.source,
            kind = %outcome.kind,
            articles = outcome.articles,
            status = %outcome.status,
            "Source summary"
        );
        report.articles.extend(articles);
        report.outcomes.push(outcome);
    }

    info!(
        total_articles = report.articles.len(),
        failed_sources = report.failed_sources(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Extraction complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(name: &str, kind: SourceKind, url: String) -> SourceDescriptor {
        SourceDescriptor {
            name: name.into(),
            kind,
            url,
            category: "general".into(),
            language: "english".into(),
        }
    }

    fn rss(base: &str, items: usize) -> String {
        let mut xml = String::from("<rss><channel>");
        for i in 0..items {
            xml.push_str(&format!(
                "<item><title>Feed story {i}</title><link>{base}/missing/{i}</link>\
                 <description>Summary {i}</description></item>"
            ));
        }
        xml.push_str("</channel></rss>");
        xml
    }

    async fn feed_server(items: usize) -> MockServer {
        let server = MockServer::start().await;
        let body = rss(&server.uri(), items);
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_run_budget() {
        let budget = RunBudget::unlimited();
        assert!(!budget.is_exhausted());
        let shared = budget.clone();
        shared.abort();
        assert!(budget.is_exhausted());

        assert!(RunBudget::new(Some(Duration::ZERO)).is_exhausted());
        assert!(!RunBudget::new(Some(Duration::from_secs(3600))).is_exhausted());
    }

    #[tokio::test]
    async fn test_crawl_without_key_cannot_be_built() {
        let ctx = ExtractionContext::for_tests(ExtractionSettings::without_delays());
        let src = source("IE", SourceKind::Crawl, "https://indianexpress.com/".into());
        let err = Strategy::for_source(&src, &ctx).unwrap_err();
        assert!(matches!(err, ExtractError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_failing_source_does_not_reduce_others() {
        let good = feed_server(3).await;
        let broken = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&broken)
            .await;

        let ctx = ExtractionContext::for_tests(ExtractionSettings::without_delays());
        let sources = vec![
            source("Broken", SourceKind::Feed, format!("{}/feed.xml", broken.uri())),
            source("Good", SourceKind::Feed, format!("{}/feed.xml", good.uri())),
            source("Keyless", SourceKind::Crawl, "https://indianexpress.com/".into()),
        ];

        let alone = extract_all(&sources[1..2], &ctx).await;
        let report = extract_all(&sources, &ctx).await;

        assert_eq!(alone.articles.len(), 3);
        assert_eq!(report.articles.len(), 3);
        assert_eq!(report.outcomes.len(), 3);
        assert!(matches!(report.outcomes[0].status, SourceStatus::Failed(_)));
        assert_eq!(report.outcomes[0].articles, 0);
        assert_eq!(report.outcomes[1].status, SourceStatus::Ok);
        assert_eq!(report.outcomes[1].articles, 3);
        assert!(matches!(report.outcomes[2].status, SourceStatus::Failed(_)));
        assert_eq!(report.failed_sources(), 2);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_skipped() {
        let good = feed_server(2).await;
        let ctx = ExtractionContext::for_tests(ExtractionSettings::without_delays());
        let sources = vec![
            source("Mystery", SourceKind::from("telegraph".to_string()), "https://x.example".into()),
            source("Good", SourceKind::Feed, format!("{}/feed.xml", good.uri())),
        ];

        let report = extract_all(&sources, &ctx).await;
        assert_eq!(report.articles.len(), 2);
        assert!(matches!(report.outcomes[0].status, SourceStatus::Skipped(_)));
        assert_eq!(report.failed_sources(), 0);
    }

    #[tokio::test]
    async fn test_output_follows_source_order() {
        let first = feed_server(2).await;
        let second = feed_server(1).await;
        let ctx = ExtractionContext::for_tests(ExtractionSettings::without_delays());
        let sources = vec![
            source("First", SourceKind::Feed, format!("{}/feed.xml", first.uri())),
            source("Second", SourceKind::Feed, format!("{}/feed.xml", second.uri())),
        ];

        let report = extract_all(&sources, &ctx).await;
        let names: Vec<_> = report.articles.iter().map(|a| a.source.as_str()).collect();
        assert_eq!(names, vec!["First", "First", "Second"]);
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_sources() {
        let good = feed_server(2).await;
        let ctx = ExtractionContext::for_tests(ExtractionSettings::without_delays());
        ctx.budget.abort();
        let sources = vec![source("Good", SourceKind::Feed, format!("{}/feed.xml", good.uri()))];

        let report = extract_all(&sources, &ctx).await;
        assert!(report.articles.is_empty());
        assert!(matches!(report.outcomes[0].status, SourceStatus::Skipped(_)));
    }
}
