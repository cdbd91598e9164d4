//! Stage orchestration.
//!
//! ```text
//! sources ─► extract ─► raw_articles.json
//!                          │
//!                          ▼
//!                        clean ─► cleaned_articles.json
//!                                    │
//!                                    ▼
//!                                 process ─► processed_articles.json
//!                                                │
//!                                                ▼
//!                                              store ─► SQLite
//! ```
//!
//! `full` runs every stage in memory and still writes each artifact. The
//! single-stage modes read their input from the previous stage's artifact.
//! An empty extraction or an empty cleaning result stops the run before any
//! downstream stage starts.

use crate::api::{ChatCompletionClient, RetryOnQuota, Simplify};
use crate::clean::Cleaner;
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::models::{Article, CleanedArticle, ProcessedArticle, RunStats};
use crate::outputs::json::{read_batch, write_batch};
use crate::process::Processor;
use crate::scrapers::{ExtractionContext, RunBudget, extract_all};
use crate::storage::{Storage, TableCounts};
use crate::utils::ensure_writable_dir;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    Extract,
    Clean,
    Process,
    Store,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::Full => "full",
            RunMode::Extract => "extract",
            RunMode::Clean => "clean",
            RunMode::Process => "process",
            RunMode::Store => "store",
        };
        f.write_str(name)
    }
}

/// API keys supplied on the command line or through the environment.
#[derive(Clone, Default)]
pub struct Credentials {
    pub crawl_api_key: Option<String>,
    pub llm_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("crawl_api_key", &self.crawl_api_key.as_ref().map(|_| "<set>"))
            .field("llm_api_key", &self.llm_api_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// New rows written by one storage pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreReport {
    pub raw: u64,
    pub cleaned: u64,
    pub processed: u64,
    pub totals: TableCounts,
}

/// What a run produced, per stage. Counts of stages the mode skipped stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub raw: Option<usize>,
    pub cleaned: Option<usize>,
    pub processed: Option<usize>,
    pub stored: Option<StoreReport>,
}

pub struct Pipeline {
    config: AppConfig,
    credentials: Credentials,
    budget: RunBudget,
}

impl Pipeline {
    pub fn new(config: AppConfig, credentials: Credentials, budget: RunBudget) -> Self {
        Self {
            config,
            credentials,
            budget,
        }
    }

    #[instrument(level = "info", skip_all, fields(mode = %mode))]
    pub async fn run(&self, mode: RunMode) -> Result<RunSummary, PipelineError> {
        let t0 = Instant::now();
        let data_dir = &self.config.paths.data_dir;
        if let Err(e) = ensure_writable_dir(data_dir).await {
            error!(
                path = %data_dir.display(),
                error = %e,
                "Data directory is not writable (fix perms or choose a different path)"
            );
            return Err(PipelineError::Artifact {
                path: data_dir.display().to_string(),
                source: e,
            });
        }

        let summary = match mode {
            RunMode::Full => {
                let simplifier = self.simplifier()?;
                self.run_full(&simplifier).await?
            }
            RunMode::Extract => {
                let raw = self.extract().await?;
                RunSummary {
                    raw: Some(raw.len()),
                    ..RunSummary::default()
                }
            }
            RunMode::Clean => {
                let raw: Vec<Article> = read_batch(&self.config.paths.raw()).await?;
                let cleaned = self.clean(&raw).await?;
                RunSummary {
                    raw: Some(raw.len()),
                    cleaned: Some(cleaned.len()),
                    ..RunSummary::default()
                }
            }
            RunMode::Process => {
                let simplifier = self.simplifier()?;
                let cleaned: Vec<CleanedArticle> = read_batch(&self.config.paths.cleaned()).await?;
                let processed = self.process(&simplifier, &cleaned).await?;
                RunSummary {
                    cleaned: Some(cleaned.len()),
                    processed: Some(processed.len()),
                    ..RunSummary::default()
                }
            }
            RunMode::Store => {
                let paths = &self.config.paths;
                let raw: Vec<Article> = read_batch(&paths.raw()).await?;
                let cleaned: Vec<CleanedArticle> = read_batch(&paths.cleaned()).await?;
                let processed: Vec<ProcessedArticle> = read_batch(&paths.processed()).await?;
                let stored = self.store(&raw, &cleaned, &processed).await?;
                RunSummary {
                    raw: Some(raw.len()),
                    cleaned: Some(cleaned.len()),
                    processed: Some(processed.len()),
                    stored: Some(stored),
                }
            }
        };

        info!(
            raw = ?summary.raw,
            cleaned = ?summary.cleaned,
            processed = ?summary.processed,
            stored = ?summary.stored.map(|s| s.raw + s.cleaned + s.processed),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Run complete"
        );
        Ok(summary)
    }

    /// Every stage in order with a caller-supplied rewrite service.
    pub async fn run_full<S: Simplify>(&self, simplifier: &S) -> Result<RunSummary, PipelineError> {
        let raw = self.extract().await?;
        let cleaned = self.clean(&raw).await?;
        let processed = self.process(simplifier, &cleaned).await?;
        let stored = self.store(&raw, &cleaned, &processed).await?;

        let removed = raw.len() - cleaned.len();
        info!(
            raw = raw.len(),
            cleaned = cleaned.len(),
            filtered_out = removed,
            processed = processed.len(),
            age_group_versions = processed.iter().map(|p| p.age_groups.len()).sum::<usize>(),
            "Pipeline summary"
        );

        Ok(RunSummary {
            raw: Some(raw.len()),
            cleaned: Some(cleaned.len()),
            processed: Some(processed.len()),
            stored: Some(stored),
        })
    }

    /// Extract every configured source and write the raw artifact.
    pub async fn extract(&self) -> Result<Vec<Article>, PipelineError> {
        let ctx = ExtractionContext::new(
            self.config.extraction.clone(),
            self.credentials.crawl_api_key.clone(),
            self.budget.clone(),
        )?;
        let report = extract_all(&self.config.sources, &ctx).await;
        if report.articles.is_empty() {
            error!(
                sources = report.outcomes.len(),
                failed = report.failed_sources(),
                "No articles extracted; stopping"
            );
            return Err(PipelineError::NothingExtracted);
        }

        write_batch(&report.articles, &self.config.paths.raw()).await?;
        Ok(report.articles)
    }

    /// Clean `raw` and write the cleaned artifact.
    pub async fn clean(&self, raw: &[Article]) -> Result<Vec<CleanedArticle>, PipelineError> {
        let cleaner = Cleaner::new(self.config.sensitive_keywords.as_slice());
        debug!(keywords = cleaner.keywords().len(), "Sensitive keyword set ready");
        let report = cleaner.clean_all(raw);
        if report.articles.is_empty() {
            error!(
                input = report.input,
                duplicates = report.duplicates_removed,
                sensitive = report.sensitive_removed,
                empty = report.empty_removed,
                "No articles survived cleaning; stopping"
            );
            return Err(PipelineError::NothingSurvivedCleaning { input: report.input });
        }

        write_batch(&report.articles, &self.config.paths.cleaned()).await?;
        Ok(report.articles)
    }

    /// Rewrite `cleaned` for every age group and write the processed artifact.
    pub async fn process<S: Simplify>(
        &self,
        simplifier: &S,
        cleaned: &[CleanedArticle],
    ) -> Result<Vec<ProcessedArticle>, PipelineError> {
        if cleaned.is_empty() {
            warn!("Nothing to process");
        }
        let processor = Processor::new(
            simplifier,
            self.config.age_groups.clone(),
            Duration::from_millis(self.config.simplifier.request_delay_ms),
        );
        let report = processor.process_all(cleaned).await?;
        write_batch(&report.articles, &self.config.paths.processed()).await?;
        Ok(report.articles)
    }

    /// Insert all three batches plus a stats row into the database.
    #[instrument(level = "info", skip_all, fields(db = %self.config.paths.database.display()))]
    pub async fn store(
        &self,
        raw: &[Article],
        cleaned: &[CleanedArticle],
        processed: &[ProcessedArticle],
    ) -> Result<StoreReport, PipelineError> {
        let storage = Storage::open(&self.config.paths.database).await?;
        let raw_rows = storage.insert_raw(raw).await?;
        let cleaned_rows = storage.insert_cleaned(cleaned).await?;
        let processed_rows = storage.insert_processed(processed).await?;
        storage.insert_stats(&RunStats::new(raw, cleaned, processed)).await?;
        let totals = storage.counts().await?;
        storage.close().await;

        info!(
            raw_total = totals.raw,
            cleaned_total = totals.cleaned,
            processed_total = totals.processed,
            runs = totals.stats,
            "Database totals"
        );
        Ok(StoreReport {
            raw: raw_rows,
            cleaned: cleaned_rows,
            processed: processed_rows,
            totals,
        })
    }

    fn simplifier(&self) -> Result<RetryOnQuota<ChatCompletionClient>, PipelineError> {
        let Some(key) = self
            .credentials
            .llm_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
        else {
            error!("LLM API key is missing");
            return Err(PipelineError::SimplifierMisconfigured(
                "no LLM API key (set LLM_API_KEY or pass --llm-api-key)".into(),
            ));
        };
        let settings = self.config.simplifier.clone();
        let (max_retries, base_delay) = (
            settings.max_retries,
            Duration::from_millis(settings.retry_base_delay_ms),
        );
        let client = ChatCompletionClient::new(settings, key)
            .map_err(|e| PipelineError::SimplifierMisconfigured(e.to_string()))?;
        Ok(RetryOnQuota::new(client, max_retries, base_delay))
    }
}
