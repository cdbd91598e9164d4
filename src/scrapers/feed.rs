//! Syndication feed strategy (RSS 2.0 and Atom).
//!
//! Titles and summaries come straight from the feed. The body of each entry
//! is fetched from the entry's link on a best-effort basis: any failure while
//! fetching or parsing the page degrades to the feed summary.

use super::ExtractionContext;
use super::html::{BodyRules, Locator, extract_body, fragment_text};
use crate::error::ExtractError;
use crate::models::{Article, ExtractionMethod, SourceDescriptor};
use crate::utils::{truncate_chars, truncate_for_log};
use chrono::{DateTime, FixedOffset, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use scraper::Html;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Content containers for article pages linked from feeds, by URL fragment.
const BODY_ROUTES: &[(&str, BodyRules)] = &[(
    "thehindu.com",
    BodyRules {
        containers: &[
            Locator::Css("div.articlebodycontent"),
            Locator::Css("article"),
            Locator::Css("div.article-body"),
        ],
        min_paragraph_chars: 0,
        fallback: None,
    },
)];

const GENERIC_BODY: BodyRules = BodyRules {
    containers: &[Locator::Css("article"), Locator::Css("div.article-body")],
    min_paragraph_chars: 0,
    fallback: None,
};

fn body_rules_for(url: &str) -> &'static BodyRules {
    let url = url.to_lowercase();
    BODY_ROUTES
        .iter()
        .find(|(fragment, _)| url.contains(fragment))
        .map(|(_, rules)| rules)
        .unwrap_or(&GENERIC_BODY)
}

/// One `<item>` or `<entry>` of a feed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub summary: String,
    pub published: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Link,
    Summary,
    Published,
    Updated,
}

impl Field {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        match name {
            b"title" => Some(Field::Title),
            b"link" => Some(Field::Link),
            b"description" | b"summary" | b"content" | b"encoded" => Some(Field::Summary),
            b"pubDate" | b"published" | b"date" | b"issued" => Some(Field::Published),
            b"updated" | b"modified" => Some(Field::Updated),
            _ => None,
        }
    }
}

impl FeedEntry {
    /// Store a completed field. The first value wins so nested elements that
    /// reuse a name (e.g. `media:title`) don't clobber the entry's own.
    fn set(&mut self, field: Field, value: String) {
        let value = value.trim().to_string();
        if value.is_empty() {
            return;
        }
        let slot = match field {
            Field::Title => &mut self.title,
            Field::Link => &mut self.link,
            Field::Summary => &mut self.summary,
            Field::Published => {
                self.published.get_or_insert(value);
                return;
            }
            Field::Updated => {
                self.updated.get_or_insert(value);
                return;
            }
        };
        if slot.is_empty() {
            *slot = value;
        }
    }
}

/// Atom links carry the URL in `href`; only alternate links point at the article.
fn atom_link(e: &BytesStart<'_>) -> Option<String> {
    let rel = e
        .try_get_attribute(b"rel")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()));
    if rel.as_deref().is_some_and(|r| r != "alternate") {
        return None;
    }
    e.try_get_attribute(b"href")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

/// Parse an RSS or Atom document into its entries, in document order.
///
/// # Arguments
///
/// * `xml` - The feed document as fetched
///
/// # Returns
///
/// The entries with their title, link, summary, body and date fields, or
/// [`ExtractError::Feed`] when the document is not a readable RSS or Atom feed.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>, ExtractError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"rss" | b"feed" | b"RDF" => saw_root = true,
                    b"item" | b"entry" => {
                        current = Some(FeedEntry::default());
                        field = None;
                    }
                    name => {
                        if let Some(entry) = current.as_mut() {
                            if name == b"link" {
                                if let Some(href) = atom_link(&e) {
                                    entry.set(Field::Link, href);
                                }
                            }
                            if let Some(f) = Field::from_local_name(name) {
                                field = Some(f);
                                text.clear();
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    if e.local_name().as_ref() == b"link" {
                        if let Some(href) = atom_link(&e) {
                            entry.set(Field::Link, href);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if field.is_some() {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| ExtractError::Feed(err.to_string()))?;
                    text.push_str(&unescaped);
                }
            }
            Ok(Event::CData(e)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"item" | b"entry" => {
                        if let Some(entry) = current.take() {
                            entries.push(entry);
                        }
                        field = None;
                    }
                    name => {
                        if let (Some(entry), Some(f)) = (current.as_mut(), field) {
                            if Field::from_local_name(name) == Some(f) {
                                entry.set(f, std::mem::take(&mut text));
                                field = None;
                            }
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Feed(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(ExtractError::Feed("document is not an RSS or Atom feed".into()));
    }
    Ok(entries)
}

/// Parse a feed date (RFC 2822 as used by RSS, or RFC 3339 as used by Atom).
pub fn parse_feed_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

/// Published date of an entry: published, then updated, then now.
pub fn entry_date(entry: &FeedEntry) -> String {
    entry
        .published
        .iter()
        .chain(entry.updated.iter())
        .find_map(|raw| parse_feed_date(raw))
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339())
}

fn body_from_html(html: &str, url: &str, cap: usize) -> Result<String, ExtractError> {
    let doc = Html::parse_document(html);
    extract_body(&doc, body_rules_for(url), cap)
}

#[derive(Debug, Clone)]
pub struct FeedStrategy {
    source: SourceDescriptor,
}

impl FeedStrategy {
    pub fn new(source: SourceDescriptor) -> Self {
        Self { source }
    }

    /// Fetch the feed and build one article per entry, up to the per-source cap.
    #[instrument(level = "info", skip_all, fields(source = %self.source.name))]
    pub async fn extract(&self, ctx: &ExtractionContext) -> Result<Vec<Article>, ExtractError> {
        let settings = &ctx.settings;
        let xml = ctx
            .fetcher
            .get_text(&self.source.url, settings.request_timeout())
            .await?;
        let entries = parse_feed(&xml)?;
        let total = entries.len().min(settings.max_articles_per_source);
        info!(entries = entries.len(), taking = total, "Parsed feed");

        let mut articles = Vec::with_capacity(total);
        for (idx, entry) in entries.into_iter().take(total).enumerate() {
            if ctx.budget.is_exhausted() {
                warn!(done = idx, total, "Run budget exhausted; stopping feed early");
                break;
            }
            if idx > 0 {
                sleep(settings.feed_item_delay()).await;
            }

            let title = match fragment_text(&entry.title) {
                t if t.is_empty() => "No Title".to_string(),
                t => t,
            };
            debug!(index = idx + 1, total, title = %truncate_for_log(&title, 60), "Feed entry");

            let summary = fragment_text(&entry.summary);
            let body = self.fetch_body(ctx, &entry.link).await;
            let raw_content = if body.is_empty() {
                truncate_chars(&summary, settings.content_char_cap).to_string()
            } else {
                body
            };

            articles.push(Article {
                source: self.source.name.clone(),
                title,
                published_date: entry_date(&entry),
                description: summary,
                url: entry.link,
                category: self.source.category.clone(),
                extraction_method: ExtractionMethod::Feed,
                raw_content,
                extracted_at: Utc::now(),
            });
        }

        info!(count = articles.len(), "Extracted feed articles");
        Ok(articles)
    }

    /// Best-effort body text of a linked article. Never fails; returns an
    /// empty string when the page can't be fetched or has no usable text.
    async fn fetch_body(&self, ctx: &ExtractionContext, link: &str) -> String {
        if link.is_empty() {
            return String::new();
        }
        let html = match ctx.fetcher.get_text(link, ctx.settings.article_timeout()).await {
            Ok(html) => html,
            Err(e) => {
                debug!(%link, error = %e, "Full article fetch failed; using feed summary");
                return String::new();
            }
        };
        body_from_html(&html, link, ctx.settings.content_char_cap).unwrap_or_else(|e| {
            debug!(%link, error = %e, "Full article parse failed; using feed summary");
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionSettings;
    use crate::models::SourceKind;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>National News</title>
    <item>
      <title>School gardens bloom across the state</title>
      <link>https://www.thehindu.com/news/national/gardens.ece</link>
      <description><![CDATA[<p>Students planted <b>sunflowers</b>.</p>]]></description>
      <pubDate>Tue, 07 Oct 2025 09:30:00 +0530</pubDate>
      <media:title>Photo caption</media:title>
    </item>
    <item>
      <title>Tom &amp; Jerry festival opens</title>
      <link>https://www.thehindu.com/news/national/festival.ece</link>
      <description>Cartoon fans gather.</description>
      <pubDate>not a date</pubDate>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example</title>
  <link rel="self" href="https://example.com/feed.atom"/>
  <entry>
    <title>Robots visit the museum</title>
    <link rel="self" href="https://example.com/api/1"/>
    <link href="https://example.com/robots"/>
    <summary>A friendly robot tour.</summary>
    <updated>2025-10-01T12:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_entries() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "School gardens bloom across the state");
        assert_eq!(entries[0].link, "https://www.thehindu.com/news/national/gardens.ece");
        assert_eq!(entries[0].summary, "<p>Students planted <b>sunflowers</b>.</p>");
        assert_eq!(entries[0].published.as_deref(), Some("Tue, 07 Oct 2025 09:30:00 +0530"));
        assert_eq!(entries[1].title, "Tom & Jerry festival opens");
    }

    #[test]
    fn test_parse_atom_entries() {
        let entries = parse_feed(ATOM).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link, "https://example.com/robots");
        assert_eq!(entries[0].summary, "A friendly robot tour.");
        assert_eq!(entries[0].updated.as_deref(), Some("2025-10-01T12:00:00Z"));
    }

    #[test]
    fn test_parse_rejects_non_feed() {
        assert!(matches!(parse_feed("<html><body>hi</body></html>"), Err(ExtractError::Feed(_))));
        assert!(parse_feed("<rss><channel><item></rss>").is_err());
    }

    #[test]
    fn test_entry_date_fallback_chain() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entry_date(&entries[0]), "2025-10-07T09:30:00+05:30");

        let atom = parse_feed(ATOM).unwrap();
        assert_eq!(entry_date(&atom[0]), "2025-10-01T12:00:00+00:00");

        // Unparsable date falls back to now.
        let before = Utc::now();
        let now = DateTime::parse_from_rfc3339(&entry_date(&entries[1])).unwrap();
        assert!(now.with_timezone(&Utc) >= before - chrono::Duration::seconds(1));
    }

    #[test]
    fn test_body_rules_route_by_site() {
        assert_eq!(body_rules_for("https://www.thehindu.com/x").containers.len(), 3);
        assert_eq!(body_rules_for("https://example.com/x").containers.len(), 2);
    }

    fn feed_source(url: String) -> SourceDescriptor {
        SourceDescriptor {
            name: "Mock Feed".into(),
            kind: SourceKind::Feed,
            url,
            category: "national".into(),
            language: "english".into(),
        }
    }

    fn rss_for(base: &str, items: usize) -> String {
        let mut xml = String::from(r#"<rss version="2.0"><channel>"#);
        for i in 0..items {
            xml.push_str(&format!(
                "<item><title>Story {i}</title><link>{base}/story/{i}</link>\
                 <description>Summary {i}</description></item>"
            ));
        }
        xml.push_str("</channel></rss>");
        xml
    }

    #[tokio::test]
    async fn test_extract_fetches_bodies_and_falls_back_to_summary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_for(&server.uri(), 2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/story/0"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><body><article><p>Full body text of story zero.</p></article></body></html>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/story/1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let ctx = ExtractionContext::for_tests(ExtractionSettings::without_delays());
        let strategy = FeedStrategy::new(feed_source(format!("{}/feed.xml", server.uri())));
        let articles = strategy.extract(&ctx).await.unwrap();

        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].raw_content, "Full body text of story zero.");
        assert_eq!(articles[0].description, "Summary 0");
        assert_eq!(articles[0].extraction_method, ExtractionMethod::Feed);
        assert_eq!(articles[1].raw_content, "Summary 1");
        assert_eq!(articles[1].source, "Mock Feed");
    }

    #[tokio::test]
    async fn test_extract_respects_item_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_for(&server.uri(), 5)))
            .mount(&server)
            .await;

        let settings = ExtractionSettings {
            max_articles_per_source: 3,
            ..ExtractionSettings::without_delays()
        };
        let ctx = ExtractionContext::for_tests(settings);
        let strategy = FeedStrategy::new(feed_source(format!("{}/feed.xml", server.uri())));
        let articles = strategy.extract(&ctx).await.unwrap();

        assert_eq!(articles.len(), 3);
        assert_eq!(articles[2].title, "Story 2");
    }

    #[tokio::test]
    async fn test_extract_stops_when_budget_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_for(&server.uri(), 4)))
            .mount(&server)
            .await;

        let ctx = ExtractionContext::for_tests(ExtractionSettings::without_delays());
        ctx.budget.abort();
        let strategy = FeedStrategy::new(feed_source(format!("{}/feed.xml", server.uri())));
        assert!(strategy.extract(&ctx).await.unwrap().is_empty());
    }
}
