//! Application configuration.
//!
//! Everything the pipeline needs to know about sources, limits, politeness,
//! the sensitive keyword list and the age groups lives in one immutable
//! [`AppConfig`] value. It is loaded once at startup from an optional YAML file
//! layered over built-in defaults, validated, and then passed explicitly to the
//! components that need it.
//!
//! # Example
//!
//! ```yaml
//! sources:
//!   - name: The Hindu
//!     kind: feed
//!     url: https://www.thehindu.com/news/national/feeder/default.rss
//!     category: national
//! extraction:
//!   max_articles_per_source: 5
//! sensitive_keywords: [murder, war, bomb]
//! ```

use crate::error::ConfigError;
use crate::models::{AgeGroupProfile, SourceDescriptor, SourceKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// The complete, immutable configuration of one process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: Vec<SourceDescriptor>,
    pub extraction: ExtractionSettings,
    pub sensitive_keywords: Vec<String>,
    pub age_groups: Vec<AgeGroupProfile>,
    pub simplifier: SimplifierSettings,
    pub paths: ArtifactPaths,
}

/// Caps, delays, timeouts and concurrency limits of the extraction phase.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Maximum characters kept in `raw_content`.
    pub content_char_cap: usize,
    pub max_articles_per_source: usize,
    pub crawl_max_articles: usize,
    pub user_agent: String,
    /// Timeout for listing pages, feeds and API calls.
    pub request_timeout_secs: u64,
    /// Timeout for secondary full-article fetches.
    pub article_timeout_secs: u64,
    pub feed_item_delay_ms: u64,
    pub scrape_item_delay_ms: u64,
    pub crawl_item_delay_ms: u64,
    pub crawl_rate_limit_cooldown_secs: u64,
    pub crawl_max_attempts: u32,
    pub crawl_api_base_url: String,
    pub max_concurrent_sources: usize,
    /// Token bucket refill rate applied to every host.
    pub host_requests_per_second: u32,
    /// Global deadline for the extraction phase; `None` means no deadline.
    pub run_timeout_secs: Option<u64>,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            content_char_cap: 2000,
            max_articles_per_source: 10,
            crawl_max_articles: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            article_timeout_secs: 15,
            feed_item_delay_ms: 500,
            scrape_item_delay_ms: 1000,
            crawl_item_delay_ms: 7000,
            crawl_rate_limit_cooldown_secs: 35,
            crawl_max_attempts: 2,
            crawl_api_base_url: "https://api.firecrawl.dev".to_string(),
            max_concurrent_sources: 3,
            host_requests_per_second: 1,
            run_timeout_secs: None,
        }
    }
}

impl ExtractionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn article_timeout(&self) -> Duration {
        Duration::from_secs(self.article_timeout_secs)
    }

    pub fn feed_item_delay(&self) -> Duration {
        Duration::from_millis(self.feed_item_delay_ms)
    }

    pub fn scrape_item_delay(&self) -> Duration {
        Duration::from_millis(self.scrape_item_delay_ms)
    }

    pub fn crawl_item_delay(&self) -> Duration {
        Duration::from_millis(self.crawl_item_delay_ms)
    }

    pub fn crawl_cooldown(&self) -> Duration {
        Duration::from_secs(self.crawl_rate_limit_cooldown_secs)
    }

    /// Settings with every delay zeroed and a generous host rate, for tests
    /// against local mock servers.
    #[cfg(test)]
    pub fn without_delays() -> Self {
        Self {
            feed_item_delay_ms: 0,
            scrape_item_delay_ms: 0,
            crawl_item_delay_ms: 0,
            crawl_rate_limit_cooldown_secs: 0,
            request_timeout_secs: 5,
            article_timeout_secs: 5,
            host_requests_per_second: 1000,
            ..Self::default()
        }
    }
}

/// Settings of the OpenAI-compatible rewrite service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimplifierSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Characters of article body sent to the service.
    pub max_input_chars: usize,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    pub request_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for SimplifierSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.5-flash-lite".to_string(),
            temperature: 0.3,
            max_tokens: 500,
            max_input_chars: 2000,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            request_delay_ms: 1000,
            request_timeout_secs: 60,
        }
    }
}

/// Locations of the JSON artifacts written between stages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub data_dir: PathBuf,
    pub raw_file: String,
    pub cleaned_file: String,
    pub processed_file: String,
    pub database: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            raw_file: "raw_articles.json".to_string(),
            cleaned_file: "cleaned_articles.json".to_string(),
            processed_file: "processed_articles.json".to_string(),
            database: PathBuf::from("news_database.db"),
        }
    }
}

impl ArtifactPaths {
    pub fn raw(&self) -> PathBuf {
        self.data_dir.join(&self.raw_file)
    }

    pub fn cleaned(&self) -> PathBuf {
        self.data_dir.join(&self.cleaned_file)
    }

    pub fn processed(&self) -> PathBuf {
        self.data_dir.join(&self.processed_file)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            extraction: ExtractionSettings::default(),
            sensitive_keywords: DEFAULT_SENSITIVE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            age_groups: default_age_groups(),
            simplifier: SimplifierSettings::default(),
            paths: ArtifactPaths::default(),
        }
    }
}

pub const DEFAULT_SENSITIVE_KEYWORDS: &[&str] = &[
    "murder", "killed", "death", "violence", "terrorist", "bomb", "rape", "assault", "abuse",
    "suicide", "war", "shooting", "massacre", "torture", "kidnap", "attack", "wounded",
    "injured", "blood", "weapon", "explosion", "riot", "dead", "stabbed", "shot dead", "corpse",
    "brutal", "slaughter", "execution", "hanging",
];

fn source(name: &str, kind: SourceKind, url: &str) -> SourceDescriptor {
    SourceDescriptor {
        name: name.to_string(),
        kind,
        url: url.to_string(),
        category: "national".to_string(),
        language: "english".to_string(),
    }
}

fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        source(
            "The Hindu",
            SourceKind::Feed,
            "https://www.thehindu.com/news/national/feeder/default.rss",
        ),
        source(
            "Hindustan Times",
            SourceKind::Scrape,
            "https://www.hindustantimes.com/india-news",
        ),
        source(
            "Indian Express",
            SourceKind::Crawl,
            "https://indianexpress.com/section/india/",
        ),
    ]
}

fn age_group(key: &str, name: &str, max_words: usize, max_sentences: usize, tag: &str) -> AgeGroupProfile {
    AgeGroupProfile {
        key: key.to_string(),
        display_name: name.to_string(),
        max_words,
        max_sentences,
        complexity_tag: tag.to_string(),
    }
}

fn default_age_groups() -> Vec<AgeGroupProfile> {
    vec![
        age_group("group_1", "6-8 years", 50, 3, "very_simple"),
        age_group("group_2", "9-11 years", 100, 5, "simple"),
        age_group("group_3", "12-14 years", 150, 8, "moderate"),
    ]
}

impl AppConfig {
    /// Load the configuration from `path`, or the built-in defaults when no
    /// path is given. The result is validated before it is returned.
    #[instrument(level = "info", skip_all, fields(path = ?path))]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_yaml(&text)?
            }
            None => Self::default(),
        };
        config.validate()?;
        info!(
            sources = config.sources.len(),
            keywords = config.sensitive_keywords.len(),
            age_groups = config.age_groups.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensitive_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("sensitive keyword list is empty".into()));
        }
        for source in &self.sources {
            if source.name.trim().is_empty() || source.url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source {:?} needs both a name and a url",
                    source.name
                )));
            }
        }
        for pair in self.age_groups.windows(2) {
            if pair[0].max_words >= pair[1].max_words {
                return Err(ConfigError::Invalid(format!(
                    "age groups must be ordered by increasing max_words ({} before {})",
                    pair[0].key, pair[1].key
                )));
            }
        }
        if self.age_groups.iter().any(|g| g.max_words == 0) {
            return Err(ConfigError::Invalid("age group max_words must be positive".into()));
        }
        if self.extraction.max_concurrent_sources == 0 {
            return Err(ConfigError::Invalid("max_concurrent_sources must be at least 1".into()));
        }
        Ok(())
    }
}
