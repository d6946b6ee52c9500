// src/pipeline/artifacts.rs
//! Per-company JSON artifacts written next to the fetched documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extractors::candidate::{DocumentType, ReportCandidate};
use crate::registry::Company;

/// `TICKER/ir_discovery.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrDiscoveryRecord {
    pub company: String,
    pub ticker: String,
    pub ir_url: String,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReport {
    pub title: String,
    pub url: String,
    /// Publication date as `YYYY-MM-DD`.
    pub date: Option<String>,
    #[serde(rename = "type")]
    pub doc_type: DocumentType,
    pub year: Option<i32>,
    pub quarter: Option<u8>,
}

/// `TICKER/extracted_reports.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReportsRecord {
    pub company: String,
    pub reports: Vec<ExtractedReport>,
}

impl ExtractedReportsRecord {
    /// One entry per candidate, ordered by normalized URL.
    pub fn new(company: &Company, candidates: &[ReportCandidate]) -> Self {
        let mut sorted: Vec<&ReportCandidate> = candidates.iter().collect();
        sorted.sort_by(|a, b| a.normalized_url.cmp(&b.normalized_url).then_with(|| a.title.cmp(&b.title)));
        let reports = sorted
            .into_iter()
            .map(|c| ExtractedReport {
                title: c.title.clone(),
                url: c.url.clone(),
                date: c.published().map(|d| d.format("%Y-%m-%d").to_string()),
                doc_type: c.kind(),
                year: c.period().map(|p| p.year),
                quarter: c.period().map(|p| p.quarter),
            })
            .collect();
        Self {
            company: company.name.clone(),
            reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::candidate::{FiscalPeriod, Sourced};
    use chrono::TimeZone;

    #[test]
    fn test_extracted_reports_shape() {
        let company = Company {
            ticker: "KO".into(),
            name: "Coca-Cola".into(),
            seeds: vec![],
        };
        let candidate = |url: &str| ReportCandidate {
            ticker: "KO".into(),
            url: url.into(),
            normalized_url: url.into(),
            title: "Q3 2025 Earnings Release".into(),
            doc_type: Sourced::heuristic(DocumentType::EarningsRelease),
            fiscal_period: FiscalPeriod::new(2025, 3).map(Sourced::heuristic),
            published_at: Some(Sourced::heuristic(Utc.with_ymd_and_hms(2025, 10, 21, 0, 0, 0).unwrap())),
            discovered_at: Utc::now(),
            source_page: "https://investors.coca-colacompany.com".into(),
        };
        let record = ExtractedReportsRecord::new(&company, &[candidate("https://x/b.pdf"), candidate("https://x/a.pdf")]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["company"], "Coca-Cola");
        assert_eq!(json["reports"][0]["url"], "https://x/a.pdf");
        assert_eq!(json["reports"][0]["date"], "2025-10-21");
        assert_eq!(json["reports"][0]["type"], "earnings_release");
        assert_eq!(json["reports"][0]["quarter"], 3);
    }
}
