//! HTML extraction of title, readable text and links
//!
//! This module handles parsing HTML content to extract:
//! - Page title
//! - Readable text (from `<main>`, `<article>` or `<body>`, without scripts)
//! - Links to follow (from `<a>` tags and canonical links)
//!
//! html5ever never rejects input, so malformed markup degrades to whatever
//! the parser could recover.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

/// Elements whose text never counts as page content
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Elements that start a new run of text
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Containers tried in order when looking for the page's main text
const CONTENT_ROOTS: &[&str] = &["main", "article", "body"];

/// Extracted information from a page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPage {
    /// The page title (from `<title>`)
    pub title: Option<String>,

    /// Readable text with whitespace collapsed
    pub text: String,

    /// Absolute http(s) links in document order, without repeats
    pub links: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid selector '{0}'")]
    Selector(String),
}

/// Turns a fetched document into title, text and links
pub trait Extractor: Send + Sync {
    fn extract(&self, html: &str, base_url: &Url) -> Result<ExtractedPage, ExtractError>;
}

/// [`Extractor`] built on scraper
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlExtractor;

impl Extractor for HtmlExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> Result<ExtractedPage, ExtractError> {
        parse_html(html, base_url)
    }
}

/// Parses HTML content and extracts title, text and links
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links and data URIs
/// - Fragment-only links
/// - Anything that does not resolve to http or https
///
/// # Example
///
/// ```
/// use kumo_crawl::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url).unwrap();
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> Result<ExtractedPage, ExtractError> {
    let document = Html::parse_document(html);

    Ok(ExtractedPage {
        title: extract_title(&document)?,
        text: extract_text(&document)?,
        links: extract_links(&document, base_url)?,
    })
}

fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|_| ExtractError::Selector(css.to_string()))
}

fn extract_title(document: &Html) -> Result<Option<String>, ExtractError> {
    let title_selector = selector("title")?;

    Ok(document
        .select(&title_selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty()))
}

fn extract_text(document: &Html) -> Result<String, ExtractError> {
    for root in CONTENT_ROOTS {
        let root_selector = selector(root)?;
        if let Some(element) = document.select(&root_selector).next() {
            let text = visible_text(element);
            if !text.is_empty() || *root == "body" {
                return Ok(text);
            }
        }
    }

    // Fragments without a body still have a root element
    Ok(visible_text(document.root_element()))
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_text(element, &mut out);
    collapse_whitespace(&out)
}

/// Appends text under `element`, separating block elements with a space
///
/// Inline markup adds nothing, so `Hel<b>lo</b>` stays one word.
fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if SKIPPED_TAGS.contains(&name) {
                continue;
            }
            let block = BLOCK_TAGS.contains(&name);
            if block {
                out.push(' ');
            }
            push_text(child_element, out);
            if block {
                out.push(' ');
            }
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_links(document: &Html, base_url: &Url) -> Result<Vec<String>, ExtractError> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();

    let mut push = |href: &str| {
        if let Some(absolute) = resolve_link(href, base_url) {
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    };

    let a_selector = selector("a[href]")?;
    for element in document.select(&a_selector) {
        if element.value().attr("download").is_some() {
            continue;
        }
        if let Some(href) = element.value().attr("href") {
            push(href);
        }
    }

    let canonical_selector = selector("link[rel='canonical'][href]")?;
    for element in document.select(&canonical_selector) {
        if let Some(href) = element.value().attr("href") {
            push(href);
        }
    }

    Ok(links)
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None for empty, fragment-only, `javascript:`, `mailto:`, `tel:`
/// and `data:` links, and for anything that fails to resolve.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute.to_string()),
        _ => None,
    }
}
