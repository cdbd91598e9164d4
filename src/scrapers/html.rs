//! HTML heuristics shared by the feed, scrape and crawl strategies.
//!
//! Pages are located with prioritized [`Locator`] lists: the first locator that
//! matches anything wins. Body text is built from paragraph text inside the
//! chosen container, ignoring paragraphs nested in page chrome (navigation,
//! headers, footers, scripts).

use crate::error::ExtractError;
use crate::utils::truncate_chars;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Elements whose content never counts as article text.
const CHROME: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript",
];

/// One way of finding elements in a document.
#[derive(Debug, Clone, Copy)]
pub enum Locator {
    /// A CSS selector; a selector list matches in document order.
    Css(&'static str),
    /// Elements of the given tags whose `class` attribute contains `needle`,
    /// compared case-insensitively.
    ClassContains {
        tags: &'static [&'static str],
        needle: &'static str,
    },
}

/// Rules for turning an article page into body text.
#[derive(Debug, Clone, Copy)]
pub struct BodyRules {
    /// Candidate content containers, most specific first.
    pub containers: &'static [Locator],
    /// Paragraphs with this many characters or fewer are dropped.
    pub min_paragraph_chars: usize,
    /// Used when no container yields any paragraph.
    pub fallback: Option<ParagraphFallback>,
}

/// "Any paragraph longer than `min_chars`, first `max_paragraphs`" over the whole page.
#[derive(Debug, Clone, Copy)]
pub struct ParagraphFallback {
    pub min_chars: usize,
    pub max_paragraphs: usize,
}

pub fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|e| ExtractError::Selector {
        selector: css.to_string(),
        reason: e.to_string(),
    })
}

/// All elements matched by one locator, in document order.
pub fn select_all<'a>(doc: &'a Html, locator: &Locator) -> Result<Vec<ElementRef<'a>>, ExtractError> {
    match locator {
        Locator::Css(css) => Ok(doc.select(&selector(css)?).collect()),
        Locator::ClassContains { tags, needle } => {
            let sel = selector(&tags.join(", "))?;
            let needle = needle.to_lowercase();
            Ok(doc
                .select(&sel)
                .filter(|el| {
                    el.value()
                        .attr("class")
                        .is_some_and(|class| class.to_lowercase().contains(&needle))
                })
                .collect())
        }
    }
}

/// The matches of the first locator that matches anything.
pub fn first_non_empty<'a>(
    doc: &'a Html,
    locators: &[Locator],
) -> Result<Vec<ElementRef<'a>>, ExtractError> {
    for locator in locators {
        let found = select_all(doc, locator)?;
        if !found.is_empty() {
            return Ok(found);
        }
    }
    Ok(Vec::new())
}

/// The first element matched by the first locator that matches anything.
pub fn first_match<'a>(
    doc: &'a Html,
    locators: &[Locator],
) -> Result<Option<ElementRef<'a>>, ExtractError> {
    Ok(first_non_empty(doc, locators)?.into_iter().next())
}

/// First descendant of `el` matching `css`.
pub fn find_in<'a>(el: ElementRef<'a>, css: &str) -> Result<Option<ElementRef<'a>>, ExtractError> {
    Ok(el.select(&selector(css)?).next())
}

/// Visible text of an element: trimmed text nodes joined by single spaces.
pub fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn inside_chrome(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(|node| node.value().as_element())
        .any(|ancestor| CHROME.contains(&ancestor.name()))
}

/// Text of every non-empty paragraph under `root` that is not page chrome.
pub fn paragraphs(root: ElementRef<'_>) -> Result<Vec<String>, ExtractError> {
    let p = selector("p")?;
    Ok(root
        .select(&p)
        .filter(|el| !inside_chrome(*el))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect())
}

/// Extract the body text of an article page and cap it at `cap` characters.
///
/// Returns an empty string when nothing qualifies; callers decide whether
/// that is acceptable.
pub fn extract_body(doc: &Html, rules: &BodyRules, cap: usize) -> Result<String, ExtractError> {
    if let Some(container) = first_match(doc, rules.containers)? {
        let kept: Vec<String> = paragraphs(container)?
            .into_iter()
            .filter(|p| p.chars().count() > rules.min_paragraph_chars)
            .collect();
        if !kept.is_empty() {
            return Ok(truncate_chars(&kept.join(" "), cap).to_string());
        }
    }

    if let Some(fallback) = rules.fallback {
        let kept: Vec<String> = paragraphs(doc.root_element())?
            .into_iter()
            .filter(|p| p.chars().count() > fallback.min_chars)
            .take(fallback.max_paragraphs)
            .collect();
        return Ok(truncate_chars(&kept.join(" "), cap).to_string());
    }

    Ok(String::new())
}

/// Plain text of an HTML fragment, e.g. a feed summary with inline markup.
pub fn fragment_text(fragment: &str) -> String {
    if !fragment.contains('<') {
        return fragment.trim().to_string();
    }
    element_text(Html::parse_fragment(fragment).root_element())
}

/// Resolve `href` against `base`, keeping only http(s) results.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    base.join(href)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}
