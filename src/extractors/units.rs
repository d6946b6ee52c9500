// src/extractors/units.rs
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::heuristics::{classify_document_type, is_document_link, parse_date, parse_fiscal_period, YearWindow};
use crate::navigator::RawPage;
use crate::utils::error::ExtractError;
use crate::utils::urls::{compact_ws, resolve_url};

// --- CSS Selectors (Lazy Static) ---
static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile ANCHOR_SELECTOR"));

/// Containers whose text usually carries the date printed next to a link.
const CONTEXT_CONTAINERS: &[&str] = &["li", "tr", "article", "dd", "p"];
const MAX_CONTEXT_CHARS: usize = 300;
const FEED_ARRAY_KEYS: &[&str] = &["reports", "items", "documents", "data"];

/// One link (or feed item) that may describe a report document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContentUnit {
    pub url: String,
    pub title: String,
    /// Text around the link (list item, table row) used for date hints.
    pub context: String,
    pub declared_type: Option<String>,
    pub declared_date: Option<String>,
    pub source_page: String,
}

impl ContentUnit {
    /// One-line rendering sent to the inference capability.
    pub fn describe(&self) -> String {
        format!("{} | {} | {}", self.title, self.url, self.context)
    }
}

#[derive(Debug, Default)]
pub struct ParsedPage {
    pub units: Vec<ContentUnit>,
    /// Links or feed items that are not report documents.
    pub ignored: usize,
}

/// Splits a retrieved page into content units. Errors when the page is in no
/// recognizable format (binary, empty, broken JSON).
pub fn parse_page(page: &RawPage, years: YearWindow) -> Result<ParsedPage, ExtractError> {
    let Ok(text) = std::str::from_utf8(&page.body) else {
        return Err(ExtractError::UnrecognizedFormat(format!("{} is not text", page.final_url)));
    };
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Err(ExtractError::UnrecognizedFormat(format!("{} is empty", page.final_url)));
    }

    let media = page.media_type().unwrap_or_default();
    if media.contains("json") || trimmed.starts_with('[') || trimmed.starts_with('{') {
        return parse_feed(trimmed, &page.final_url);
    }
    if media.contains("html") || media.contains("xml") || trimmed.starts_with('<') {
        return Ok(parse_html(text, &page.final_url, years));
    }
    Err(ExtractError::UnrecognizedFormat(format!(
        "{} has unsupported content ({})",
        page.final_url,
        if media.is_empty() { "no content type" } else { media.as_str() }
    )))
}

fn context_text(anchor: ElementRef<'_>) -> String {
    let container = anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| CONTEXT_CONTAINERS.contains(&el.value().name()));
    let Some(container) = container else {
        return String::new();
    };
    compact_ws(&container.text().collect::<String>())
        .chars()
        .take(MAX_CONTEXT_CHARS)
        .collect()
}

/// A non-document link still counts when its text names a report type and a period or date.
fn looks_like_report(title: &str, context: &str, years: YearWindow) -> bool {
    classify_document_type(title).is_some()
        && (parse_fiscal_period(title, years).is_some() || parse_date(context, years).is_some())
}

fn parse_html(html: &str, base_url: &str, years: YearWindow) -> ParsedPage {
    let document = Html::parse_document(html);
    let mut parsed = ParsedPage::default();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(url) = anchor.value().attr("href").and_then(|href| resolve_url(href, base_url)) else {
            parsed.ignored += 1;
            continue;
        };
        let text = compact_ws(&anchor.text().collect::<String>());
        let title = match anchor.value().attr("title").map(compact_ws) {
            Some(attr) if text.is_empty() || attr.len() > text.len() => attr,
            _ => text,
        };
        let context = context_text(anchor);

        if !is_document_link(&url) && !looks_like_report(&title, &context, years) {
            tracing::trace!("Ignoring navigational link {} ('{}')", url, title);
            parsed.ignored += 1;
            continue;
        }
        parsed.units.push(ContentUnit {
            url,
            title,
            context,
            declared_type: None,
            declared_date: None,
            source_page: base_url.to_string(),
        });
    }
    parsed
}

fn feed_string(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_feed(raw: &str, base_url: &str) -> Result<ParsedPage, ExtractError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| ExtractError::MalformedFeed(e.to_string()))?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(obj) => FEED_ARRAY_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
            .ok_or_else(|| ExtractError::MalformedFeed(format!("no report array in feed from {base_url}")))?,
        _ => return Err(ExtractError::MalformedFeed(format!("feed from {base_url} is not an array"))),
    };

    let mut parsed = ParsedPage::default();
    for item in items {
        let Some(obj) = item.as_object() else {
            parsed.ignored += 1;
            continue;
        };
        let Some(url) = feed_string(obj, &["url", "href", "link"]).and_then(|u| resolve_url(&u, base_url)) else {
            parsed.ignored += 1;
            continue;
        };
        parsed.units.push(ContentUnit {
            url,
            title: feed_string(obj, &["title", "name"]).unwrap_or_default(),
            context: String::new(),
            declared_type: feed_string(obj, &["type", "category", "document_type"]),
            declared_date: feed_string(obj, &["date", "published", "published_at", "publication_date"]),
            source_page: base_url.to_string(),
        });
    }
    Ok(parsed)
}
