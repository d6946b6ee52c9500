// src/registry/models.rs
use reqwest::Url;
use serde::{Deserialize, Serialize};

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";

/// Where discovery for a company starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySeed {
    /// A known investor-relations page, e.g. a prior IR URL.
    IrUrl(String),
    /// A search query template; `{name}` and `{ticker}` are substituted.
    SearchQuery(String),
}

impl DiscoverySeed {
    /// The URL to retrieve for this seed, or `None` when the seed is unusable.
    pub fn resolve(&self, company: &Company) -> Option<String> {
        match self {
            DiscoverySeed::IrUrl(url) => {
                let parsed = Url::parse(url.trim()).ok()?;
                matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
            }
            DiscoverySeed::SearchQuery(template) => {
                let query = template
                    .replace("{name}", &company.name)
                    .replace("{ticker}", &company.ticker);
                let query = query.trim();
                if query.is_empty() {
                    return None;
                }
                let mut url = Url::parse(SEARCH_ENDPOINT).ok()?;
                url.query_pairs_mut().append_pair("q", query);
                Some(url.to_string())
            }
        }
    }
}

/// A company the pipeline collects reports for. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Company {
    pub ticker: String,
    pub name: String,
    pub seeds: Vec<DiscoverySeed>,
}

/// Raw registry entry as written in the registry file.
#[derive(Debug, Deserialize)]
pub(crate) struct CompanyRecord {
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub seeds: Vec<DiscoverySeed>,
    /// Shorthand for a single `ir_url` seed.
    #[serde(default)]
    pub ir_url: Option<String>,
}
