// src/navigator/links.rs
use std::collections::HashSet;

use once_cell::sync::Lazy;
use reqwest::Url;
use scraper::{Html, Selector};

use crate::extractors::heuristics::is_document_link;
use crate::utils::urls::{compact_ws, host, normalize_url, resolve_url};

static ANCHOR_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Failed to compile ANCHOR_SELECTOR"));

/// Keywords that mark a link as leading towards quarterly results.
const QUARTERLY_KEYWORDS: &[&str] = &[
    "quarterly-result", "quarterly-report", "quarterly-earning", "earnings", "income-statement",
    "financial-information", "financial-report", "financial-statements", "results",
    "q1", "q2", "q3", "q4", "1q", "2q", "3q", "4q", "10-q",
];

/// Hosts that never lead to IR material.
const EXCLUDED_HOSTS: &[&str] = &[
    "facebook.com", "twitter.com", "x.com", "linkedin.com", "instagram.com", "youtube.com",
    "tiktok.com", "pinterest.com",
];

/// Words that mark a search result as an investor-relations site.
const IR_KEYWORDS: &[&str] = &["investor", "shareholder", "stockholder", "ir."];

/// Which links of a page may be followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkScope {
    /// Same host as the page only.
    Internal,
    /// Results of a web search: other hosts only, redirect wrappers unwrapped.
    SearchResults,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromisingLink {
    pub url: String,
    pub text: String,
    pub score: usize,
}

fn keyword_hits(haystack: &str, keywords: &[&str]) -> usize {
    let dashed = haystack.to_lowercase().replace(' ', "-");
    keywords.iter().filter(|k| dashed.contains(*k)).count()
}

fn is_excluded(url: &str) -> bool {
    match host(url) {
        Some(h) => EXCLUDED_HOSTS.iter().any(|ex| h == *ex || h.ends_with(&format!(".{ex}"))),
        None => true,
    }
}

/// Search engines wrap result links in a redirect (`/l/?uddg=<target>`); returns the target.
fn unwrap_redirect(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.query_pairs().find(|(k, _)| k == "uddg").map(|(_, v)| v.into_owned()))
        .filter(|target| Url::parse(target).is_ok())
        .unwrap_or_else(|| url.to_string())
}

/// Scores the navigational links of an HTML page and returns the best `limit`,
/// highest score first. Document links, already visited URLs and links outside
/// `scope` are skipped.
pub fn find_promising_links(
    html: &str,
    base_url: &str,
    limit: usize,
    visited: &HashSet<String>,
    scope: LinkScope,
) -> Vec<PromisingLink> {
    let document = Html::parse_document(html);
    let base_host = host(base_url);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(mut url) = anchor.value().attr("href").and_then(|href| resolve_url(href, base_url)) else {
            continue;
        };
        if scope == LinkScope::SearchResults {
            url = unwrap_redirect(&url);
        }
        let same_host = host(&url) == base_host;
        let in_scope = match scope {
            LinkScope::Internal => same_host,
            LinkScope::SearchResults => !same_host,
        };
        let normalized = normalize_url(&url);
        if !in_scope
            || is_document_link(&url)
            || visited.contains(&normalized)
            || is_excluded(&url)
            || !seen.insert(normalized)
        {
            continue;
        }

        let text = compact_ws(&anchor.text().collect::<String>());
        let title = anchor.value().attr("title").unwrap_or_default();
        let mut score = keyword_hits(&text, QUARTERLY_KEYWORDS)
            + keyword_hits(title, QUARTERLY_KEYWORDS)
            + keyword_hits(&url, QUARTERLY_KEYWORDS);
        if scope == LinkScope::SearchResults {
            score += keyword_hits(&text, IR_KEYWORDS) + keyword_hits(&url, IR_KEYWORDS);
        }
        if score > 0 {
            links.push(PromisingLink { url, text, score });
        }
    }

    // Stable order: score desc, then URL for reproducibility
    links.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.url.cmp(&b.url)));
    links.truncate(limit);
    links
}
