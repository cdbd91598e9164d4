//! Data models shared by every pipeline stage.
//!
//! This module defines the records that flow through the pipeline:
//! - [`SourceDescriptor`]: one configured news source
//! - [`Article`]: a raw article as produced by an extraction strategy
//! - [`CleanedArticle`]: an article that passed normalization, dedup and the safety filter
//! - [`AgeGroupProfile`]: word and sentence budgets for one reader age group
//! - [`ProcessedArticle`] / [`AgeGroupVariant`]: the simplified, per-age output
//! - [`RunStats`]: the counters recorded for one pipeline run
//!
//! All records serialize with snake_case field names; the JSON artifacts written
//! between stages are plain arrays of these records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a source is extracted.
///
/// Parsed from the `kind` string of the configuration. The legacy names
/// `rss`, `scraper` and `firecrawl` are accepted as aliases. Unknown kinds are
/// kept verbatim so the dispatcher can log and skip the source instead of
/// refusing to load the whole configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum SourceKind {
    Feed,
    Scrape,
    Crawl,
    Unrecognized(String),
}

impl From<String> for SourceKind {
    fn from(kind: String) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "feed" | "rss" | "atom" => SourceKind::Feed,
            "scrape" | "scraper" => SourceKind::Scrape,
            "crawl" | "firecrawl" => SourceKind::Crawl,
            _ => SourceKind::Unrecognized(kind),
        }
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Feed => f.write_str("feed"),
            SourceKind::Scrape => f.write_str("scrape"),
            SourceKind::Crawl => f.write_str("crawl"),
            SourceKind::Unrecognized(other) => f.write_str(other),
        }
    }
}

/// A configured news source. Immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_language() -> String {
    "english".to_string()
}

/// The strategy that produced an [`Article`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Feed,
    Scrape,
    Crawl,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Feed => "feed",
            ExtractionMethod::Scrape => "scrape",
            ExtractionMethod::Crawl => "crawl",
        }
    }
}

/// A raw article as extracted from a source.
///
/// `url` is the natural identifier of the record. `raw_content` is already
/// capped at the configured character budget when a strategy creates it.
/// Nothing mutates an `Article` after extraction; the cleaner builds new values.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Article {
    /// Display name of the source the article came from.
    pub source: String,
    pub title: String,
    pub description: String,
    pub url: String,
    /// RFC 3339 when the source date parsed, else the source's own string or the extraction time.
    pub published_date: String,
    pub category: String,
    pub extraction_method: ExtractionMethod,
    /// Body text, capped at the content budget.
    pub raw_content: String,
    pub extracted_at: DateTime<Utc>,
}

/// An article that survived the cleaning stage.
///
/// Serialized flat: the article fields followed by the cleaning metadata.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CleanedArticle {
    #[serde(flatten)]
    pub article: Article,
    /// Whitespace-separated word count of `raw_content`.
    pub word_count: usize,
    pub is_cleaned: bool,
    pub cleaned_at: DateTime<Utc>,
}

/// Word and sentence budget for one reader age group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AgeGroupProfile {
    /// Stable identifier, e.g. `group_1`.
    pub key: String,
    /// Human readable name, e.g. `6-8 years`.
    pub display_name: String,
    pub max_words: usize,
    pub max_sentences: usize,
    pub complexity_tag: String,
}

/// Text of one article adapted to one age group.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AgeGroupVariant {
    pub age_group_key: String,
    pub age_group: String,
    pub text: String,
    pub word_count: usize,
    pub sentence_count: usize,
    pub complexity_level: String,
    pub model_used: String,
}

/// Whether the simplified base text came from the LLM or is the original body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Simplification {
    Rewritten,
    Fallback,
}

/// A cleaned article rewritten once and truncated for every age group.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProcessedArticle {
    pub original: CleanedArticle,
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_date: String,
    pub category: String,
    pub simplified_base: String,
    pub simplification: Simplification,
    pub tokens_used: u64,
    pub age_groups: Vec<AgeGroupVariant>,
    pub processed_at: DateTime<Utc>,
}

/// Counters recorded for one run of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunStats {
    pub extraction_date: DateTime<Utc>,
    pub total_raw_articles: usize,
    pub total_cleaned_articles: usize,
    pub total_processed_articles: usize,
    /// Comma separated, sorted, de-duplicated source names.
    pub sources_used: String,
}

impl RunStats {
    pub fn new(
        raw: &[Article],
        cleaned: &[CleanedArticle],
        processed: &[ProcessedArticle],
    ) -> Self {
        use itertools::Itertools;
        let sources_used = raw.iter().map(|a| a.source.as_str()).sorted().dedup().join(", ");
        Self {
            extraction_date: Utc::now(),
            total_raw_articles: raw.len(),
            total_cleaned_articles: cleaned.len(),
            total_processed_articles: processed.len(),
            sources_used,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_aliases() {
        assert_eq!(SourceKind::from("rss".to_string()), SourceKind::Feed);
        assert_eq!(SourceKind::from("Scraper".to_string()), SourceKind::Scrape);
        assert_eq!(SourceKind::from("firecrawl".to_string()), SourceKind::Crawl);
        assert_eq!(
            SourceKind::from("telegraph".to_string()),
            SourceKind::Unrecognized("telegraph".to_string())
        );
    }

    #[test]
    fn test_unknown_kind_still_deserializes() {
        let yaml = "name: Pigeon Post\nkind: pigeon\nurl: https://example.com\n";
        let source: SourceDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(source.kind, SourceKind::Unrecognized("pigeon".to_string()));
        assert_eq!(source.category, "general");
        assert_eq!(source.language, "english");
    }

    #[test]
    fn test_cleaned_article_serializes_flat() {
        let cleaned = CleanedArticle {
            article: fixtures::article("Flood hits city", "", "Water everywhere."),
            word_count: 2,
            is_cleaned: true,
            cleaned_at: Utc::now(),
        };
        let value = serde_json::to_value(&cleaned).unwrap();
        assert_eq!(value["title"], "Flood hits city");
        assert_eq!(value["extraction_method"], "feed");
        assert_eq!(value["word_count"], 2);
        assert_eq!(value["is_cleaned"], true);

        let back: CleanedArticle = serde_json::from_value(value).unwrap();
        assert_eq!(back, cleaned);
    }

    #[test]
    fn test_run_stats_sources_used() {
        let mut a = fixtures::article("One", "", "x");
        a.source = "The Hindu".into();
        let mut b = fixtures::article("Two", "", "y");
        b.source = "Indian Express".into();
        let c = a.clone();
        let stats = RunStats::new(&[a, b, c], &[], &[]);
        assert_eq!(stats.total_raw_articles, 3);
        assert_eq!(stats.sources_used, "Indian Express, The Hindu");
    }
}
