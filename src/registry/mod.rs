// src/registry/mod.rs
pub mod models;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::utils::error::RegistryError;
use models::CompanyRecord;
pub use models::{Company, DiscoverySeed};

/// Static ticker -> company mapping loaded once per process.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    companies: Vec<Company>,
}

impl SourceRegistry {
    /// Loads the registry from a JSON file: an array of
    /// `{ticker, name, seeds: [{ir_url} | {search_query}], ir_url?}`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let raw = fs::read_to_string(path.as_ref())?;
        tracing::debug!("Read {} bytes of registry from {}", raw.len(), path.as_ref().display());
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RegistryError> {
        let records: Vec<CompanyRecord> = serde_json::from_str(raw)?;
        let mut seen = HashSet::new();
        let mut companies = Vec::with_capacity(records.len());

        for record in records {
            let ticker = record.ticker.trim().to_uppercase();
            if ticker.is_empty() {
                return Err(RegistryError::InvalidEntry {
                    ticker: record.name,
                    reason: "empty ticker".into(),
                });
            }
            if !seen.insert(ticker.clone()) {
                return Err(RegistryError::DuplicateTicker(ticker));
            }

            let mut seeds = Vec::new();
            if let Some(url) = record.ir_url.filter(|u| !u.trim().is_empty()) {
                seeds.push(DiscoverySeed::IrUrl(url));
            }
            seeds.extend(record.seeds);
            if seeds.is_empty() {
                return Err(RegistryError::InvalidEntry {
                    ticker,
                    reason: "no discovery seeds".into(),
                });
            }

            let name = record.name.trim().to_string();
            companies.push(Company {
                name: if name.is_empty() { ticker.clone() } else { name },
                ticker,
                seeds,
            });
        }

        if companies.is_empty() {
            return Err(RegistryError::Empty);
        }
        tracing::info!("Loaded {} companies into the source registry", companies.len());
        Ok(Self { companies })
    }

    /// Keeps only the given tickers (case-insensitive). An empty filter keeps everything.
    pub fn filter(self, tickers: &[String]) -> Result<Self, RegistryError> {
        if tickers.is_empty() {
            return Ok(self);
        }
        let wanted: HashSet<String> = tickers.iter().map(|t| t.trim().to_uppercase()).collect();
        let companies: Vec<Company> = self
            .companies
            .into_iter()
            .filter(|c| wanted.contains(&c.ticker))
            .collect();
        if companies.is_empty() {
            return Err(RegistryError::NoMatchingCompanies(tickers.join(",")));
        }
        tracing::info!("Filtered registry to {} companies", companies.len());
        Ok(Self { companies })
    }

    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub fn len(&self) -> usize {
        self.companies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"[
        {"ticker": "aapl", "name": "Apple", "ir_url": "https://investor.apple.com"},
        {"ticker": "KO", "name": "Coca-Cola", "seeds": [{"search_query": "{name} quarterly results"}]}
    ]"#;

    #[test]
    fn test_load_normalizes_tickers_and_seeds() {
        let registry = SourceRegistry::from_json_str(REGISTRY).unwrap();
        assert_eq!(registry.len(), 2);
        let [apple, coke] = registry.companies() else {
            panic!("expected two companies");
        };
        assert_eq!(apple.ticker, "AAPL");
        assert_eq!(apple.seeds, vec![DiscoverySeed::IrUrl("https://investor.apple.com".into())]);
        assert_eq!(coke.ticker, "KO");
        assert_eq!(coke.seeds, vec![DiscoverySeed::SearchQuery("{name} quarterly results".into())]);
    }

    #[test]
    fn test_empty_registry_is_fatal() {
        assert!(matches!(SourceRegistry::from_json_str("[]"), Err(RegistryError::Empty)));
        assert!(matches!(SourceRegistry::from_json_str("{"), Err(RegistryError::Parse(_))));
    }

    #[test]
    fn test_duplicate_ticker_rejected() {
        let raw = r#"[
            {"ticker": "KO", "name": "Coca-Cola", "ir_url": "https://a.example.com"},
            {"ticker": "ko", "name": "Coke", "ir_url": "https://b.example.com"}
        ]"#;
        assert!(matches!(
            SourceRegistry::from_json_str(raw),
            Err(RegistryError::DuplicateTicker(t)) if t == "KO"
        ));
    }

    #[test]
    fn test_entry_without_seeds_rejected() {
        let raw = r#"[{"ticker": "KO", "name": "Coca-Cola"}]"#;
        assert!(matches!(
            SourceRegistry::from_json_str(raw),
            Err(RegistryError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_filter() {
        let registry = SourceRegistry::from_json_str(REGISTRY).unwrap();
        let filtered = registry.clone().filter(&["ko".to_string()]).unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(matches!(
            registry.filter(&["MSFT".to_string()]),
            Err(RegistryError::NoMatchingCompanies(_))
        ));
    }
}
