//! Error types for every stage of the pipeline.
//!
//! Errors are split along the failure taxonomy the pipeline cares about:
//!
//! - [`ExtractError`]: a source (or one of its items) could not be extracted.
//!   The dispatcher absorbs these per source; they never abort a run.
//! - [`CrawlError`]: a call to the crawling API failed. Rate-limit signals are
//!   distinguishable so the crawl strategy can cool down and retry.
//! - [`SimplifierError`]: the LLM rewrite service failed; the caller decides
//!   between retry, fallback and abort based on the variant.
//! - [`ConfigError`]: configuration could not be loaded or is inconsistent.
//! - [`PipelineError`]: the run cannot continue and must be reported as failed.

use thiserror::Error;

/// Failure while extracting articles from a single source.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid selector {selector}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("Feed parse error: {0}")]
    Feed(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Crawl API error: {0}")]
    Crawl(#[from] CrawlError),
}

/// Failure reported by the crawling API client.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API request failed: {0}")]
    Api(String),
}

impl CrawlError {
    /// Whether the error is an upstream throttling signal worth a cooldown.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, CrawlError::RateLimited(_))
    }
}

/// Failure reported by the text simplification service.
#[derive(Error, Debug)]
pub enum SimplifierError {
    #[error("Quota or rate limit hit: {0}")]
    Quota(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Simplifier error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for SimplifierError {
    fn from(e: reqwest::Error) -> Self {
        SimplifierError::Other(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A condition that aborts the run before downstream stages are invoked.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No articles were extracted from any source")]
    NothingExtracted,

    #[error("No articles survived cleaning and safety filtering ({input} in)")]
    NothingSurvivedCleaning { input: usize },

    #[error("Simplifier is misconfigured: {0}")]
    SimplifierMisconfigured(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction setup failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("Artifact I/O error on {path}: {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}
