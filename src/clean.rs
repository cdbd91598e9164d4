//! Cleaning and safety filtering of raw articles.
//!
//! Four stages run in a fixed order over the whole batch:
//!
//! 1. **Normalize** title, description and body ([`normalize_text`]); an empty
//!    body falls back to the description.
//! 2. **Deduplicate** by normalized title key ([`dedup_key`]), first one wins.
//! 3. **Safety filter**: drop any article whose text contains a sensitive
//!    keyword as a plain substring. Matching is not word-aware,
//!    so "warfare" and "award" are both rejected for "war".
//! 4. **Stamp** cleaning metadata; articles that still have no body are dropped.
//!
//! Raw articles are never modified; every surviving record is a new value.

use crate::models::{Article, CleanedArticle};
use crate::utils::{truncate_for_log, upcase, word_count};
use chrono::Utc;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\w\s.,!?;:'"\-]"#).expect("valid regex"));
static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static REPEATED_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.,!?]{2,}").expect("valid regex"));
static NON_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid regex"));

/// Normalize a piece of article text.
///
/// Characters outside word characters, whitespace and `. , ! ? ; : ' " -` are
/// removed, whitespace runs become one space, runs of `.,!?` collapse to their
/// last character, and the result is trimmed with its first letter
/// capitalized. Applying it twice gives the same result as applying it once.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize_text("  flood   hits <b>city</b>!!?  "), "Flood hits bcityb?");
/// ```
pub fn normalize_text(text: &str) -> String {
    let stripped = DISALLOWED.replace_all(text, "");
    let spaced = WHITESPACE.replace_all(&stripped, " ");
    let collapsed = REPEATED_PUNCT.replace_all(&spaced, |caps: &regex::Captures<'_>| {
        caps[0].chars().last().map(String::from).unwrap_or_default()
    });
    upcase(collapsed.trim())
}

/// Normalize every text field of an article into a new record.
///
/// An empty body is replaced by the normalized description.
pub fn normalize_article(article: &Article) -> Article {
    let title = normalize_text(&article.title);
    let description = normalize_text(&article.description);
    let mut body = normalize_text(&article.raw_content);
    if body.is_empty() {
        body = description.clone();
    }
    Article {
        title,
        description,
        raw_content: body,
        ..article.clone()
    }
}

/// Key two titles share when they are the same story: lower-cased,
/// punctuation removed, whitespace runs collapsed to one space.
pub fn dedup_key(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = NON_WORD.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
}

/// Keep the first item per title key, in input order. Items whose key is
/// empty are dropped.
///
/// # Arguments
///
/// * `items` - Records in extraction order
/// * `title` - Reads the title the key is built from
///
/// # Returns
///
/// The surviving records, order preserved.
pub fn deduplicate<T, F>(items: Vec<T>, title: F) -> Vec<T>
where
    F: Fn(&T) -> &str,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| {
            let key = dedup_key(title(item));
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Keyword {
    term: String,
    /// The term as it reads after [`normalize_text`], when that differs.
    normalized: Option<String>,
}

impl Keyword {
    fn new(term: String) -> Self {
        let normalized = normalize_text(&term).to_lowercase();
        let normalized = (!normalized.is_empty() && normalized != term).then_some(normalized);
        Self { term, normalized }
    }

    fn found_in(&self, lowered: &str) -> bool {
        lowered.contains(self.term.as_str())
            || self
                .normalized
                .as_deref()
                .is_some_and(|n| lowered.contains(n))
    }
}

/// Lower-cased, trimmed, de-duplicated banned terms.
///
/// A term that normalization would rewrite (`9/11`, `gun&knife`) also
/// matches in its normalized spelling, so it still hits cleaned text.
#[derive(Debug, Clone)]
pub struct SensitiveKeywords(Vec<Keyword>);

impl SensitiveKeywords {
    pub fn new<S: AsRef<str>>(terms: &[S]) -> Self {
        Self(
            terms
                .iter()
                .map(|t| t.as_ref().trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .unique()
                .map(Keyword::new)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The first keyword contained in `text`, compared case-insensitively.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        let text = text.to_lowercase();
        self.0
            .iter()
            .find(|k| k.found_in(&text))
            .map(|k| k.term.as_str())
    }

    /// The first keyword in the article's title, description or body.
    ///
    /// Fields are checked joined both with and without a separating space so
    /// a keyword straddling two fields is caught either way.
    pub fn article_match(&self, article: &Article) -> Option<&str> {
        let spaced = format!(
            "{} {} {}",
            article.title, article.description, article.raw_content
        );
        let joined = format!("{}{}{}", article.title, article.description, article.raw_content);
        self.first_match(&spaced).or_else(|| self.first_match(&joined))
    }
}

/// An article removed by the safety filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub title: String,
    pub url: String,
    pub keyword: String,
}

/// Result of cleaning one batch.
#[derive(Debug, Default)]
pub struct CleaningReport {
    pub articles: Vec<CleanedArticle>,
    pub input: usize,
    /// Duplicates plus articles without a usable title.
    pub duplicates_removed: usize,
    pub sensitive_removed: usize,
    pub empty_removed: usize,
    pub rejections: Vec<Rejection>,
}

#[derive(Debug, Clone)]
pub struct Cleaner {
    keywords: SensitiveKeywords,
}

impl Cleaner {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: SensitiveKeywords::new(keywords),
        }
    }

    pub fn keywords(&self) -> &SensitiveKeywords {
        &self.keywords
    }

    /// Run all cleaning stages over a raw batch.
    ///
    /// # Arguments
    ///
    /// * `raw` - Extracted articles; they are read, never modified
    ///
    /// # Returns
    ///
    /// A [`CleaningReport`] holding the survivors in input order plus the
    /// count removed by each stage.
    #[instrument(level = "info", skip_all, fields(input = raw.len()))]
    pub fn clean_all(&self, raw: &[Article]) -> CleaningReport {
        let mut report = CleaningReport {
            input: raw.len(),
            ..Default::default()
        };

        let normalized: Vec<(&Article, Article)> =
            raw.iter().map(|a| (a, normalize_article(a))).collect();
        let unique = deduplicate(normalized, |(_, a)| a.title.as_str());
        report.duplicates_removed = raw.len() - unique.len();
        debug!(kept = unique.len(), removed = report.duplicates_removed, "Deduplicated");

        // Both spellings are checked: normalization can split or join a term.
        let mut safe = Vec::with_capacity(unique.len());
        for (original, article) in unique {
            let hit = self
                .keywords
                .article_match(&article)
                .or_else(|| self.keywords.article_match(original));
            match hit {
                Some(keyword) => {
                    warn!(
                        title = %truncate_for_log(&article.title, 60),
                        url = %article.url,
                        keyword,
                        "Rejected sensitive article"
                    );
                    report.rejections.push(Rejection {
                        title: article.title.clone(),
                        url: article.url.clone(),
                        keyword: keyword.to_string(),
                    });
                }
                None => safe.push(article),
            }
        }
        report.sensitive_removed = report.rejections.len();

        let cleaned_at = Utc::now();
        for article in safe {
            if article.raw_content.is_empty() {
                debug!(url = %article.url, "Dropped article without body text");
                report.empty_removed += 1;
                continue;
            }
            report.articles.push(CleanedArticle {
                word_count: word_count(&article.raw_content),
                is_cleaned: true,
                cleaned_at,
                article,
            });
        }

        info!(
            input = report.input,
            kept = report.articles.len(),
            duplicates = report.duplicates_removed,
            sensitive = report.sensitive_removed,
            empty = report.empty_removed,
            "Cleaning complete"
        );
        report
    }
}
