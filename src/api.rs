//! LLM rewrite service with exponential backoff on quota errors.
//!
//! This module talks to an OpenAI-compatible chat-completions endpoint to
//! rewrite an article in child-friendly language. Failures are classified so
//! the caller can pick a policy per kind of failure.
//!
//! # Architecture
//!
//! - [`Simplify`]: Core trait defining one async rewrite
//! - [`ChatCompletionClient`]: `reqwest` client for `POST {base_url}/chat/completions`
//! - [`RetryOnQuota`]: Decorator that retries quota and rate-limit failures
//!
//! # Retry Strategy
//!
//! - Only [`SimplifierError::Quota`] is retried; other errors return at once
//! - Exponential backoff starting at `retry_base_delay_ms`
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::config::SimplifierSettings;
use crate::error::SimplifierError;
use crate::utils::{truncate_chars, truncate_for_log};
use rand::{Rng, rng};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Text returned by the rewrite service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Simplified {
    pub text: String,
    pub tokens_used: u64,
}

/// Trait for one async rewrite of an article.
///
/// Implementors send a title and body to a language model and return the
/// rewritten text. Decorators such as [`RetryOnQuota`] wrap another
/// implementation.
pub trait Simplify {
    /// Name of the model doing the rewrite, recorded on every variant.
    fn model(&self) -> &str;

    /// Rewrite `content` for children.
    ///
    /// # Arguments
    ///
    /// * `title` - The article title, given to the model as context
    /// * `content` - The article body
    async fn simplify(&self, title: &str, content: &str) -> Result<Simplified, SimplifierError>;
}

impl<T: Simplify> Simplify for &T {
    fn model(&self) -> &str {
        (**self).model()
    }

    async fn simplify(&self, title: &str, content: &str) -> Result<Simplified, SimplifierError> {
        (**self).simplify(title, content).await
    }
}

/// Build the rewrite prompt. Bodies longer than `max_chars` are cut and marked with "...".
pub fn build_prompt(title: &str, content: &str, max_chars: usize) -> String {
    let cut = truncate_chars(content, max_chars);
    let content = if cut.len() < content.len() {
        format!("{cut}...")
    } else {
        cut.to_string()
    };
    format!(
        "You are an expert at rewriting news articles for children. Your task is to rewrite \
         this article in simple, child-friendly language.

ORIGINAL ARTICLE:
Title: {title}
Content: {content}

INSTRUCTIONS:
1. Rewrite the ENTIRE article in simple English suitable for children aged 6-14
2. Use short sentences (8-12 words each)
3. Use simple everyday words - avoid complex vocabulary
4. Keep ALL the important facts accurate
5. Make it engaging and interesting for kids
6. DO NOT shorten or summarize - rewrite all content
7. Write in a friendly, conversational tone

Write ONLY the rewritten article (no explanations):"
    )
}

/// Map a failed response onto the error kinds callers act on.
pub fn classify_failure(status: StatusCode, body: &str) -> SimplifierError {
    let lower = body.to_lowercase();
    let detail = truncate_for_log(body, 200);
    if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("quota")
        || lower.contains("rate limit")
    {
        SimplifierError::Quota(detail)
    } else if status == StatusCode::NOT_FOUND || lower.contains("not found") {
        SimplifierError::ModelNotFound(detail)
    } else {
        SimplifierError::Other(format!("{status}: {detail}"))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// Client for an OpenAI-compatible chat-completions API.
#[derive(Clone)]
pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    settings: SimplifierSettings,
}

impl fmt::Debug for ChatCompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionClient {
    pub fn new(settings: SimplifierSettings, api_key: impl Into<String>) -> Result<Self, SimplifierError> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            settings,
        })
    }
}

impl Simplify for ChatCompletionClient {
    fn model(&self) -> &str {
        &self.settings.model
    }

    #[instrument(level = "info", skip_all, fields(title = %truncate_for_log(title, 50)))]
    async fn simplify(&self, title: &str, content: &str) -> Result<Simplified, SimplifierError> {
        let t0 = Instant::now();
        let prompt = build_prompt(title, content, self.settings.max_input_chars);
        let body = json!({
            "model": self.settings.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        let dt = t0.elapsed();

        if !status.is_success() {
            let err = classify_failure(status, &text);
            warn!(elapsed_ms = dt.as_millis() as u64, error = %err, "API call failed");
            return Err(err);
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| SimplifierError::Other(format!("unexpected response: {e}")))?;
        let rewritten = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SimplifierError::Other("empty completion".into()))?;
        let tokens_used = parsed.usage.map(|u| u.total_tokens).unwrap_or(0);

        debug!(
            elapsed_ms = dt.as_millis() as u64,
            tokens_used,
            chars = rewritten.len(),
            "Rewrite received"
        );
        Ok(Simplified {
            text: rewritten,
            tokens_used,
        })
    }
}

/// Wrapper that adds exponential backoff on quota errors to any [`Simplify`].
///
/// # Backoff Strategy
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryOnQuota<T> {
    /// The underlying client to wrap.
    inner: T,
    /// Maximum number of retries after the first attempt.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
}

impl<T: Simplify> RetryOnQuota<T> {
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryOnQuota<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOnQuota")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T: Simplify> Simplify for RetryOnQuota<T> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    #[instrument(level = "info", skip_all)]
    async fn simplify(&self, title: &str, content: &str) -> Result<Simplified, SimplifierError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.simplify(title, content).await {
                Ok(resp) => return Ok(resp),
                Err(e @ SimplifierError::Quota(_)) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();
                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "simplify() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "simplify() hit quota; backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers from a script; once the script runs out every call repeats the fallback.
    pub struct ScriptedSimplifier {
        script: Mutex<VecDeque<Result<Simplified, SimplifierError>>>,
        fallback: fn() -> Result<Simplified, SimplifierError>,
        pub calls: Mutex<usize>,
    }

    impl ScriptedSimplifier {
        pub fn new(
            script: Vec<Result<Simplified, SimplifierError>>,
            fallback: fn() -> Result<Simplified, SimplifierError>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: Mutex::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl Simplify for ScriptedSimplifier {
        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn simplify(&self, _title: &str, _content: &str) -> Result<Simplified, SimplifierError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(self.fallback)
        }
    }

    pub fn rewritten(text: &str) -> Result<Simplified, SimplifierError> {
        Ok(Simplified {
            text: text.to_string(),
            tokens_used: 42,
        })
    }
}
