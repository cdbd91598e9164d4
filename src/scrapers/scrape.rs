//! Listing-page scraping strategy.
//!
//! The listing page is fetched once and handed to a site profile chosen from
//! [`SITE_ROUTES`] by URL substring, falling back to [`GENERIC_SITE`]. A profile
//! is pure data: where the article cards are, how to read a title and a link
//! out of a card, and optionally how to fetch and read the full article page.
//! Adding a site means adding a row to the table.
//!
//! | Site | Cards | Title | Full article |
//! |------|-------|-------|--------------|
//! | Hindustan Times | `cartHolder`/`bigCart`/`listView`, `media-box`, `article` | heading, else link | yes |
//! | NDTV | `news_Itm`, `new_storylising` | link text | no |
//! | The Wire | `article` | `h3`/`h2` | no |
//! | generic | `article`, `div[class*=article]` | `h1`-`h4` | no |

use super::ExtractionContext;
use super::html::{
    BodyRules, Locator, ParagraphFallback, element_text, extract_body, find_in, first_non_empty,
    resolve_link,
};
use super::http::parse_url;
use crate::error::ExtractError;
use crate::models::{Article, ExtractionMethod, SourceDescriptor};
use crate::utils::{truncate_chars, truncate_for_log};
use chrono::Utc;
use scraper::{ElementRef, Html};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// How the title of a card is found.
#[derive(Debug, Clone, Copy)]
pub enum TitleRule {
    /// Text of the first matching heading, else the link text.
    HeadingOrLink(&'static str),
    LinkText,
    /// Text of the first matching heading; cards without one are skipped.
    Heading(&'static str),
}

/// Which anchor of a card carries the article URL.
#[derive(Debug, Clone, Copy)]
pub enum LinkRule {
    /// First `a` in the card; cards without one are skipped.
    FirstInCard,
    /// `a` inside the title heading, if any.
    InHeading,
}

/// Secondary fetch of the article page to replace the card teaser with body text.
#[derive(Debug, Clone, Copy)]
pub struct FullArticleRules {
    pub body: BodyRules,
    /// Articles with this many body characters or fewer are rejected.
    pub min_content_chars: usize,
    /// Length of the description derived from the body when the card has none.
    pub description_chars: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SiteProfile {
    pub name: &'static str,
    /// Origin for relative links; the listing URL is used when `None`.
    pub origin: Option<&'static str>,
    pub cards: &'static [Locator],
    pub title: TitleRule,
    pub link: LinkRule,
    /// Cards whose title has fewer characters are skipped.
    pub min_title_chars: usize,
    pub full_article: Option<FullArticleRules>,
}

#[derive(Debug, Clone, Copy)]
pub struct SiteRoute {
    pub url_fragment: &'static str,
    pub profile: SiteProfile,
}

const ANY_HEADING: &str = "h1, h2, h3, h4";

pub const HINDUSTAN_TIMES_ARTICLE: FullArticleRules = FullArticleRules {
    body: BodyRules {
        containers: &[
            Locator::Css("div.detail"),
            Locator::Css("div.storyDetails"),
            Locator::Css("div.story-details"),
            Locator::Css("div.contentbody"),
            Locator::Css("div.story"),
            Locator::Css("article.main-article"),
            Locator::Css("article"),
            Locator::ClassContains {
                tags: &["div"],
                needle: "article",
            },
        ],
        min_paragraph_chars: 30,
        fallback: Some(ParagraphFallback {
            min_chars: 50,
            max_paragraphs: 10,
        }),
    },
    min_content_chars: 100,
    description_chars: 200,
};

pub const SITE_ROUTES: &[SiteRoute] = &[
    SiteRoute {
        url_fragment: "hindustantimes.com",
        profile: SiteProfile {
            name: "hindustan_times",
            origin: Some("https://www.hindustantimes.com"),
            cards: &[
                Locator::Css("div.cartHolder, div.bigCart, div.listView"),
                Locator::Css("div.media-box"),
                Locator::Css("article"),
            ],
            title: TitleRule::HeadingOrLink(ANY_HEADING),
            link: LinkRule::FirstInCard,
            min_title_chars: 15,
            full_article: Some(HINDUSTAN_TIMES_ARTICLE),
        },
    },
    SiteRoute {
        url_fragment: "ndtv.com",
        profile: SiteProfile {
            name: "ndtv",
            origin: Some("https://www.ndtv.com"),
            cards: &[Locator::Css("div.news_Itm"), Locator::Css("div.new_storylising")],
            title: TitleRule::LinkText,
            link: LinkRule::FirstInCard,
            min_title_chars: 11,
            full_article: None,
        },
    },
    SiteRoute {
        url_fragment: "thewire.in",
        profile: SiteProfile {
            name: "the_wire",
            origin: Some("https://thewire.in"),
            cards: &[Locator::Css("article")],
            title: TitleRule::Heading("h3, h2"),
            link: LinkRule::InHeading,
            min_title_chars: 1,
            full_article: None,
        },
    },
];

pub const GENERIC_SITE: SiteProfile = SiteProfile {
    name: "generic",
    origin: None,
    cards: &[
        Locator::Css("article"),
        Locator::ClassContains {
            tags: &["div"],
            needle: "article",
        },
    ],
    title: TitleRule::Heading(ANY_HEADING),
    link: LinkRule::FirstInCard,
    min_title_chars: 11,
    full_article: None,
};

/// Pick the site profile for a listing URL.
pub fn route(url: &str) -> SiteProfile {
    let url = url.to_lowercase();
    SITE_ROUTES
        .iter()
        .find(|r| url.contains(r.url_fragment))
        .map(|r| r.profile)
        .unwrap_or(GENERIC_SITE)
}

/// An article teaser read from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub title: String,
    /// Absolute URL, or empty when the card has no usable link.
    pub url: String,
    pub description: String,
}

fn read_card(card: ElementRef<'_>, profile: &SiteProfile, base: &Url) -> Result<Option<Card>, ExtractError> {
    let heading = match profile.title {
        TitleRule::HeadingOrLink(css) | TitleRule::Heading(css) => find_in(card, css)?,
        TitleRule::LinkText => None,
    };
    if matches!(profile.title, TitleRule::Heading(_)) && heading.is_none() {
        return Ok(None);
    }

    let link = match profile.link {
        LinkRule::FirstInCard => match find_in(card, "a")? {
            Some(a) => Some(a),
            None => return Ok(None),
        },
        LinkRule::InHeading => match heading {
            Some(h) => find_in(h, "a")?,
            None => None,
        },
    };

    let heading_text = heading.map(element_text).unwrap_or_default();
    let title = match profile.title {
        TitleRule::HeadingOrLink(_) if heading_text.is_empty() => {
            link.map(element_text).unwrap_or_default()
        }
        TitleRule::LinkText => link.map(element_text).unwrap_or_default(),
        _ => heading_text,
    };
    if title.is_empty() || title.chars().count() < profile.min_title_chars {
        return Ok(None);
    }

    let url = link
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve_link(base, href))
        .map(|u| u.to_string())
        .unwrap_or_default();
    let description = find_in(card, "p")?.map(element_text).unwrap_or_default();

    Ok(Some(Card {
        title,
        url,
        description,
    }))
}

/// Read every acceptable card from a listing page, in document order.
pub fn parse_cards(html: &str, profile: &SiteProfile, base: &Url) -> Result<Vec<Card>, ExtractError> {
    let doc = Html::parse_document(html);
    let containers = first_non_empty(&doc, profile.cards)?;
    debug!(site = profile.name, containers = containers.len(), "Found card containers");

    let mut cards = Vec::new();
    for container in containers {
        if let Some(card) = read_card(container, profile, base)? {
            cards.push(card);
        }
    }
    Ok(cards)
}

fn body_from_html(html: &str, rules: &BodyRules, cap: usize) -> Result<String, ExtractError> {
    let doc = Html::parse_document(html);
    extract_body(&doc, rules, cap)
}

#[derive(Debug, Clone)]
pub struct ScrapeStrategy {
    source: SourceDescriptor,
    profile: SiteProfile,
}

impl ScrapeStrategy {
    pub fn new(source: SourceDescriptor) -> Self {
        let profile = route(&source.url);
        Self::with_profile(source, profile)
    }

    pub fn with_profile(source: SourceDescriptor, profile: SiteProfile) -> Self {
        Self { source, profile }
    }

    #[instrument(level = "info", skip_all, fields(source = %self.source.name, site = self.profile.name))]
    pub async fn extract(&self, ctx: &ExtractionContext) -> Result<Vec<Article>, ExtractError> {
        let html = ctx
            .fetcher
            .get_text(&self.source.url, ctx.settings.request_timeout())
            .await?;
        let base = parse_url(self.profile.origin.unwrap_or(self.source.url.as_str()))?;
        let cards = parse_cards(&html, &self.profile, &base)?;
        info!(cards = cards.len(), "Parsed listing page");

        let articles = match self.profile.full_article {
            None => cards
                .into_iter()
                .take(ctx.settings.max_articles_per_source)
                .map(|card| {
                    let body = truncate_chars(&card.description, ctx.settings.content_char_cap).to_string();
                    self.article(card, body)
                })
                .collect(),
            Some(rules) => self.with_full_articles(ctx, cards, &rules).await,
        };

        info!(count = articles.len(), "Scraped articles");
        Ok(articles)
    }

    async fn with_full_articles(
        &self,
        ctx: &ExtractionContext,
        cards: Vec<Card>,
        rules: &FullArticleRules,
    ) -> Vec<Article> {
        let cap = ctx.settings.max_articles_per_source;
        let mut articles = Vec::new();

        for (idx, mut card) in cards.into_iter().enumerate() {
            if articles.len() >= cap {
                break;
            }
            if ctx.budget.is_exhausted() {
                warn!(accepted = articles.len(), "Run budget exhausted; stopping scrape early");
                break;
            }
            if idx > 0 {
                sleep(ctx.settings.scrape_item_delay()).await;
            }

            let content = if card.url.is_empty() {
                truncate_chars(&card.description, ctx.settings.content_char_cap).to_string()
            } else {
                self.fetch_body(ctx, &card.url, rules).await
            };

            if content.chars().count() <= rules.min_content_chars {
                warn!(
                    title = %truncate_for_log(&card.title, 40),
                    chars = content.chars().count(),
                    "Skipped article with insufficient content"
                );
                continue;
            }
            if card.description.is_empty() {
                card.description = truncate_chars(&content, rules.description_chars).to_string();
            }
            debug!(
                index = articles.len() + 1,
                title = %truncate_for_log(&card.title, 50),
                chars = content.chars().count(),
                "Accepted article"
            );
            articles.push(self.article(card, content));
        }
        articles
    }

    /// Body text of the article page, or an empty string when it can't be read.
    async fn fetch_body(&self, ctx: &ExtractionContext, url: &str, rules: &FullArticleRules) -> String {
        let html = match ctx.fetcher.get_text(url, ctx.settings.article_timeout()).await {
            Ok(html) => html,
            Err(e) => {
                warn!(%url, error = %truncate_for_log(&e.to_string(), 80), "Could not fetch article");
                return String::new();
            }
        };
        body_from_html(&html, &rules.body, ctx.settings.content_char_cap).unwrap_or_else(|e| {
            warn!(%url, error = %e, "Could not parse article");
            String::new()
        })
    }

    fn article(&self, card: Card, body: String) -> Article {
        let now = Utc::now();
        Article {
            source: self.source.name.clone(),
            title: card.title,
            description: card.description,
            url: card.url,
            published_date: now.to_rfc3339(),
            category: self.source.category.clone(),
            extraction_method: ExtractionMethod::Scrape,
            raw_content: body,
            extracted_at: now,
        }
    }
}
