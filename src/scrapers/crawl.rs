//! Crawl-API strategy: discover article links on a listing page rendered by
//! the crawling service, then render each article individually.
//!
//! Requests are paced with a fixed delay between articles and every call goes
//! through [`CooldownRetry`], so a rate-limited article costs one cooldown and
//! one retry before it is dropped. Sibling articles are unaffected.

use super::ExtractionContext;
use super::firecrawl::{CooldownRetry, CrawlApi, CrawledPage, Pause};
use super::html::{Locator, find_in, first_non_empty, resolve_link};
use super::http::parse_url;
use crate::config::ExtractionSettings;
use crate::error::ExtractError;
use crate::models::{Article, ExtractionMethod, SourceDescriptor};
use crate::utils::{truncate_chars, truncate_for_log};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use scraper::Html;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

const MIN_CONTENT_CHARS: usize = 100;
const MIN_MARKDOWN_TITLE_CHARS: usize = 16;
const DESCRIPTION_CHARS: usize = 200;

const TITLE_KEYS: &[&str] = &["title", "og:title", "ogTitle"];
const DESCRIPTION_KEYS: &[&str] = &["description", "og:description", "ogDescription"];
const DATE_KEYS: &[&str] = &[
    "publishedTime",
    "modifiedTime",
    "published_time",
    "modified_time",
    "article:published_time",
    "article:modified_time",
];

/// Where article links live on a listing page and which paths count as articles.
#[derive(Debug, Clone, Copy)]
pub struct LinkProfile {
    pub name: &'static str,
    pub containers: &'static [Locator],
    /// Accepted path fragments; `None` accepts paths under the listing's own path.
    pub path_patterns: Option<&'static [&'static str]>,
}

pub const LINK_ROUTES: &[(&str, LinkProfile)] = &[(
    "indianexpress.com",
    LinkProfile {
        name: "indian_express",
        containers: &[
            Locator::Css("div.articles, div.ie-first-story, div.ie-story"),
            Locator::ClassContains {
                tags: &["article", "div"],
                needle: "story",
            },
        ],
        path_patterns: Some(&["/article/", "/india/", "/section/india/"]),
    },
)];

pub const GENERIC_LINKS: LinkProfile = LinkProfile {
    name: "generic",
    containers: &[
        Locator::Css("article"),
        Locator::ClassContains {
            tags: &["article", "div"],
            needle: "story",
        },
        Locator::ClassContains {
            tags: &["article", "div"],
            needle: "article",
        },
    ],
    path_patterns: None,
};

pub fn link_profile(url: &str) -> LinkProfile {
    let url = url.to_lowercase();
    LINK_ROUTES
        .iter()
        .find(|(fragment, _)| url.contains(fragment))
        .map(|(_, profile)| *profile)
        .unwrap_or(GENERIC_LINKS)
}

fn accepts_path(profile: &LinkProfile, listing: &Url, candidate: &Url) -> bool {
    let path = candidate.path();
    match profile.path_patterns {
        Some(patterns) => patterns.iter().any(|p| path.contains(p)),
        None => path.starts_with(listing.path()),
    }
}

/// Candidate article links of a listing page, deduplicated, same-host only,
/// in document order and capped at `cap`.
pub fn discover_links(
    html: &str,
    profile: &LinkProfile,
    listing: &Url,
    cap: usize,
) -> Result<Vec<String>, ExtractError> {
    let doc = Html::parse_document(html);
    let mut links = Vec::new();
    for container in first_non_empty(&doc, profile.containers)? {
        let Some(anchor) = find_in(container, "a[href]")? else {
            continue;
        };
        let Some(mut url) = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_link(listing, href))
        else {
            continue;
        };
        url.set_fragment(None);
        if url.host_str() != listing.host_str() || url == *listing {
            continue;
        }
        if accepts_path(profile, listing, &url) {
            links.push(url.to_string());
        }
    }
    Ok(links.into_iter().unique().take(cap).collect())
}

fn meta_str(metadata: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| metadata.get(*k))
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Array(items) => items.iter().find_map(|i| i.as_str()).map(|s| s.trim().to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

/// Flatten markdown to plain text: heading markers stripped, image and
/// link-only lines dropped, lines joined with single spaces.
pub fn flatten_markdown(markdown: &str) -> String {
    markdown
        .lines()
        .filter(|line| !line.starts_with("![") && !line.starts_with('['))
        .map(|line| line.trim().trim_matches(|c| c == '#' || c == ' ').trim())
        .filter(|line| !line.is_empty())
        .join(" ")
}

fn markdown_title(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .map(str::trim)
        .find(|line| !line.starts_with('#') && line.chars().count() >= MIN_MARKDOWN_TITLE_CHARS)
        .map(str::to_string)
}

fn markdown_description(markdown: &str) -> Option<String> {
    markdown
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#'))
        .map(|p| truncate_chars(p, DESCRIPTION_CHARS).to_string())
}

fn published_date(metadata: &Map<String, Value>) -> String {
    match meta_str(metadata, DATE_KEYS) {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .or_else(|_| DateTime::parse_from_rfc2822(&raw))
            .map(|d| d.to_rfc3339())
            .unwrap_or(raw),
        None => Utc::now().to_rfc3339(),
    }
}

/// Build an article from a rendered page, or `None` when it has no title or
/// too little text.
pub fn parse_crawled_page(
    page: &CrawledPage,
    url: &str,
    source: &SourceDescriptor,
    cap: usize,
) -> Option<Article> {
    let title = meta_str(&page.metadata, TITLE_KEYS).or_else(|| markdown_title(&page.markdown))?;
    let description = meta_str(&page.metadata, DESCRIPTION_KEYS)
        .or_else(|| markdown_description(&page.markdown))
        .unwrap_or_default();
    let raw_content = truncate_chars(&flatten_markdown(&page.markdown), cap).to_string();
    if raw_content.chars().count() < MIN_CONTENT_CHARS {
        return None;
    }

    Some(Article {
        source: source.name.clone(),
        title,
        description,
        url: url.to_string(),
        published_date: published_date(&page.metadata),
        category: source.category.clone(),
        extraction_method: ExtractionMethod::Crawl,
        raw_content,
        extracted_at: Utc::now(),
    })
}

#[derive(Debug, Clone)]
pub struct CrawlStrategy<C, P> {
    source: SourceDescriptor,
    api: C,
    pause: P,
    retry: CooldownRetry<P>,
}

impl<C: CrawlApi, P: Pause + Clone> CrawlStrategy<C, P> {
    pub fn new(source: SourceDescriptor, api: C, pause: P, settings: &ExtractionSettings) -> Self {
        let retry = CooldownRetry::new(
            settings.crawl_cooldown(),
            settings.crawl_max_attempts,
            pause.clone(),
        );
        Self {
            source,
            api,
            pause,
            retry,
        }
    }

    #[instrument(level = "info", skip_all, fields(source = %self.source.name))]
    pub async fn extract(&self, ctx: &ExtractionContext) -> Result<Vec<Article>, ExtractError> {
        let settings = &ctx.settings;
        let listing = parse_url(&self.source.url)?;
        let page = self.retry.run(|| self.api.scrape(&self.source.url)).await?;

        let profile = link_profile(&self.source.url);
        let links = discover_links(&page.html, &profile, &listing, settings.crawl_max_articles)?;
        info!(links = links.len(), profile = profile.name, "Discovered article links");

        let mut articles = Vec::new();
        for (idx, link) in links.iter().enumerate() {
            if ctx.budget.is_exhausted() {
                warn!(done = idx, total = links.len(), "Run budget exhausted; stopping crawl early");
                break;
            }
            if idx > 0 {
                self.pause.pause(settings.crawl_item_delay()).await;
            }

            match self.retry.run(|| self.api.scrape(link)).await {
                Ok(page) => match parse_crawled_page(&page, link, &self.source, settings.content_char_cap) {
                    Some(article) => {
                        debug!(
                            index = idx + 1,
                            title = %truncate_for_log(&article.title, 50),
                            chars = article.raw_content.chars().count(),
                            "Crawled article"
                        );
                        articles.push(article);
                    }
                    None => debug!(%link, "Crawled page had no title or too little text"),
                },
                Err(e) => warn!(%link, error = %e, "Dropped article after crawl failure"),
            }
        }

        info!(count = articles.len(), "Extracted crawled articles");
        Ok(articles)
    }
}

#[cfg(test)]
mod tests {
    use super::super::firecrawl::testing::RecordingPause;
    use super::*;
    use crate::error::CrawlError;
    use crate::models::SourceKind;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    const LISTING: &str = "https://indianexpress.com/section/india/";

    fn listing_html() -> String {
        r#"
        <div class="articles"><a href="/article/india/solar-school-1/">Solar school</a></div>
        <div class="articles"><a href="https://indianexpress.com/article/india/tigers-2/#comments">Tigers</a></div>
        <div class="articles"><a href="/article/india/tigers-2/">Tigers again</a></div>
        <div class="articles"><a href="https://other.example.com/article/india/x/">Elsewhere</a></div>
        <div class="articles"><a href="/about-us/">About</a></div>
        <div class="articles"><span>no link</span></div>
        <div class="articles"><a href="/article/india/rain-3/">Rain</a></div>
        "#
        .to_string()
    }

    fn body(topic: &str) -> String {
        format!(
            "# {topic}\n\n![photo](x.jpg)\n[Share](y)\nChildren across the country took part in the {topic} \
             project this week, learning how their towns can save water and energy together."
        )
    }

    fn article_page(title: &str) -> CrawledPage {
        CrawledPage {
            markdown: body(title),
            html: String::new(),
            metadata: json!({"title": title, "publishedTime": "2025-10-05T08:00:00Z"})
                .as_object()
                .cloned()
                .unwrap(),
        }
    }

    /// Scripted crawl service: each URL answers from a queue of responses.
    #[derive(Default)]
    struct ScriptedApi {
        responses: Mutex<HashMap<String, Vec<Result<CrawledPage, CrawlError>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn on(self, url: &str, responses: Vec<Result<CrawledPage, CrawlError>>) -> Self {
            self.responses.lock().unwrap().insert(url.to_string(), responses);
            self
        }

        fn calls_for(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    impl CrawlApi for &ScriptedApi {
        async fn scrape(&self, url: &str) -> Result<CrawledPage, CrawlError> {
            self.calls.lock().unwrap().push(url.to_string());
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(url) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => Err(CrawlError::Api(format!("unexpected url {url}"))),
            }
        }
    }

    fn source() -> SourceDescriptor {
        SourceDescriptor {
            name: "Indian Express".into(),
            kind: SourceKind::Crawl,
            url: LISTING.into(),
            category: "national".into(),
            language: "english".into(),
        }
    }

    fn rate_limited() -> Result<CrawledPage, CrawlError> {
        Err(CrawlError::RateLimited("429 Too Many Requests".into()))
    }

    #[test]
    fn test_discover_links_filters_and_dedups() {
        let listing = Url::parse(LISTING).unwrap();
        let profile = link_profile(LISTING);
        let links = discover_links(&listing_html(), &profile, &listing, 10).unwrap();
        assert_eq!(
            links,
            vec![
                "https://indianexpress.com/article/india/solar-school-1/",
                "https://indianexpress.com/article/india/tigers-2/",
                "https://indianexpress.com/article/india/rain-3/",
            ]
        );

        let capped = discover_links(&listing_html(), &profile, &listing, 2).unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_generic_links_stay_under_listing_path() {
        let listing = Url::parse("https://news.example/kids/").unwrap();
        let html = r#"
            <article><a href="/kids/space-camp">Space camp</a></article>
            <article><a href="/sports/cricket">Cricket</a></article>
        "#;
        let links = discover_links(html, &GENERIC_LINKS, &listing, 10).unwrap();
        assert_eq!(links, vec!["https://news.example/kids/space-camp"]);
    }

    #[test]
    fn test_flatten_markdown() {
        let md = "## Big news\n\n![img](a.png)\n[Link only](b)\nFirst line.\n  Second line.  ";
        assert_eq!(flatten_markdown(md), "Big news First line. Second line.");
    }

    #[test]
    fn test_parse_crawled_page_uses_metadata() {
        let article = parse_crawled_page(&article_page("Solar school"), "https://x/1", &source(), 2000).unwrap();
        assert_eq!(article.title, "Solar school");
        assert_eq!(article.published_date, "2025-10-05T08:00:00+00:00");
        assert_eq!(article.extraction_method, ExtractionMethod::Crawl);
        assert!(article.raw_content.starts_with("Solar school Children across"));
        assert!(!article.raw_content.contains("photo"));
        // No description in metadata: first non-heading markdown paragraph.
        assert!(article.description.starts_with("![photo]"));
    }

    #[test]
    fn test_parse_crawled_page_markdown_fallbacks_and_gate() {
        let page = CrawledPage {
            markdown: format!("# Heading\nA title line found in the body\n\n{}", "word ".repeat(30)),
            ..Default::default()
        };
        let article = parse_crawled_page(&page, "https://x/2", &source(), 2000).unwrap();
        assert_eq!(article.title, "A title line found in the body");
        assert_eq!(article.description, "word ".repeat(30).trim());

        let thin = CrawledPage {
            markdown: "A title line that is long enough\n\nshort".into(),
            ..Default::default()
        };
        assert!(parse_crawled_page(&thin, "https://x/3", &source(), 2000).is_none());

        let untitled = CrawledPage {
            markdown: "# only\n\nshort".into(),
            ..Default::default()
        };
        assert!(parse_crawled_page(&untitled, "https://x/4", &source(), 2000).is_none());
    }

    #[test]
    fn test_unparsable_metadata_date_is_kept() {
        let mut page = article_page("Solar school");
        page.metadata
            .insert("publishedTime".into(), Value::String("Oct 5, 2025".into()));
        let article = parse_crawled_page(&page, "https://x/5", &source(), 2000).unwrap();
        assert_eq!(article.published_date, "Oct 5, 2025");
    }

    fn settings() -> ExtractionSettings {
        ExtractionSettings {
            crawl_item_delay_ms: 7000,
            crawl_rate_limit_cooldown_secs: 35,
            ..ExtractionSettings::without_delays()
        }
    }

    #[tokio::test]
    async fn test_rate_limited_item_retried_once_then_dropped() {
        let listing_page = CrawledPage {
            html: listing_html(),
            ..Default::default()
        };
        let solar = "https://indianexpress.com/article/india/solar-school-1/";
        let tigers = "https://indianexpress.com/article/india/tigers-2/";
        let rain = "https://indianexpress.com/article/india/rain-3/";
        let api = ScriptedApi::default()
            .on(LISTING, vec![Ok(listing_page)])
            .on(solar, vec![Ok(article_page("Solar school"))])
            .on(tigers, vec![rate_limited(), rate_limited()])
            .on(rain, vec![rate_limited(), Ok(article_page("Rain"))]);

        let pause = RecordingPause::default();
        let ctx = ExtractionContext::for_tests(settings());
        let strategy = CrawlStrategy::new(source(), &api, pause.clone(), &ctx.settings);
        let articles = strategy.extract(&ctx).await.unwrap();

        let titles: Vec<_> = articles.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["Solar school", "Rain"]);
        assert_eq!(api.calls_for(tigers), 2);
        assert_eq!(api.calls_for(rain), 2);
        assert_eq!(api.calls_for(solar), 1);

        let cooldowns = pause
            .calls()
            .iter()
            .filter(|d| **d == Duration::from_secs(35))
            .count();
        let item_delays = pause
            .calls()
            .iter()
            .filter(|d| **d == Duration::from_millis(7000))
            .count();
        assert_eq!(cooldowns, 2);
        // Between three items, never after the last.
        assert_eq!(item_delays, 2);
    }

    #[tokio::test]
    async fn test_listing_failure_is_source_fatal() {
        let api = ScriptedApi::default().on(LISTING, vec![Err(CrawlError::Api("Unauthorized".into()))]);
        let ctx = ExtractionContext::for_tests(settings());
        let strategy = CrawlStrategy::new(source(), &api, RecordingPause::default(), &ctx.settings);
        assert!(matches!(strategy.extract(&ctx).await, Err(ExtractError::Crawl(_))));
    }
}
