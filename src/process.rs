//! Age-group processing: one rewrite per article, then per-age truncation.
//!
//! Each cleaned article is sent to the rewrite service once. The result (or
//! the original body when the service fails) is cut to the word budget of
//! every configured age group without any further model calls.

use crate::api::Simplify;
use crate::error::{PipelineError, SimplifierError};
use crate::models::{AgeGroupProfile, AgeGroupVariant, CleanedArticle, ProcessedArticle, Simplification};
use crate::utils::{truncate_for_log, word_count};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").expect("valid regex"));

const ELLIPSIS: &str = "...";

/// Cut `text` to at most `max_words` words.
///
/// Text within the budget is returned unchanged. Otherwise the first
/// `max_words` words are joined with single spaces, trailing punctuation is
/// removed from the last one and "..." is appended.
///
/// # Arguments
///
/// * `text` - Rewritten article text
/// * `max_words` - Word budget of the age group
///
/// # Returns
///
/// The text unchanged, or its first `max_words` words followed by "...".
pub fn truncate_for_age_group(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    let kept = words[..max_words].join(" ");
    let kept = kept.trim_end_matches(['.', '!', '?', ',', ';', ':']);
    format!("{kept}{ELLIPSIS}")
}

/// Non-empty segments between runs of `.`, `!` and `?`.
pub fn sentence_count(text: &str) -> usize {
    SENTENCE_END
        .split(text)
        .filter(|s| !s.trim().is_empty())
        .count()
}

pub fn age_group_variant(text: &str, profile: &AgeGroupProfile, model: &str) -> AgeGroupVariant {
    let text = truncate_for_age_group(text, profile.max_words);
    AgeGroupVariant {
        age_group_key: profile.key.clone(),
        age_group: profile.display_name.clone(),
        word_count: word_count(&text),
        sentence_count: sentence_count(&text),
        complexity_level: profile.complexity_tag.clone(),
        model_used: model.to_string(),
        text,
    }
}

#[derive(Debug, Default)]
pub struct ProcessingReport {
    pub articles: Vec<ProcessedArticle>,
    pub rewritten: usize,
    pub fallbacks: usize,
    pub tokens_used: u64,
}

pub struct Processor<S> {
    simplifier: S,
    age_groups: Vec<AgeGroupProfile>,
    request_delay: Duration,
}

impl<S: Simplify> Processor<S> {
    pub fn new(simplifier: S, age_groups: Vec<AgeGroupProfile>, request_delay: Duration) -> Self {
        Self {
            simplifier,
            age_groups,
            request_delay,
        }
    }

    /// Rewrite and truncate every article.
    ///
    /// Quota and other service failures fall back to the original body. A
    /// missing model aborts processing, since every later call would fail the
    /// same way.
    #[instrument(level = "info", skip_all, fields(articles = cleaned.len(), model = self.simplifier.model()))]
    pub async fn process_all(&self, cleaned: &[CleanedArticle]) -> Result<ProcessingReport, PipelineError> {
        let t0 = Instant::now();
        let mut report = ProcessingReport::default();

        for (idx, item) in cleaned.iter().enumerate() {
            if idx > 0 && !self.request_delay.is_zero() {
                sleep(self.request_delay).await;
            }
            let article = &item.article;

            let (base, simplification, tokens) =
                match self.simplifier.simplify(&article.title, &article.raw_content).await {
                    Ok(out) => (out.text, Simplification::Rewritten, out.tokens_used),
                    Err(SimplifierError::ModelNotFound(detail)) => {
                        error!(model = self.simplifier.model(), %detail, "Model not found; aborting processing");
                        return Err(PipelineError::SimplifierMisconfigured(format!(
                            "model {} not found: {detail}",
                            self.simplifier.model()
                        )));
                    }
                    Err(e) => {
                        warn!(
                            title = %truncate_for_log(&article.title, 50),
                            error = %e,
                            "Rewrite failed; using original text"
                        );
                        (article.raw_content.clone(), Simplification::Fallback, 0)
                    }
                };

            match simplification {
                Simplification::Rewritten => report.rewritten += 1,
                Simplification::Fallback => report.fallbacks += 1,
            }
            report.tokens_used += tokens;

            let age_groups = self
                .age_groups
                .iter()
                .map(|profile| age_group_variant(&base, profile, self.simplifier.model()))
                .collect();

            report.articles.push(ProcessedArticle {
                original: item.clone(),
                source: article.source.clone(),
                title: article.title.clone(),
                url: article.url.clone(),
                published_date: article.published_date.clone(),
                category: article.category.clone(),
                simplified_base: base,
                simplification,
                tokens_used: tokens,
                age_groups,
                processed_at: Utc::now(),
            });
        }

        info!(
            processed = report.articles.len(),
            rewritten = report.rewritten,
            fallbacks = report.fallbacks,
            tokens_used = report.tokens_used,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Processing complete"
        );
        Ok(report)
    }
}
