// src/extractors/candidate.rs
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Disclosure type of a report document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    EarningsRelease,
    SlideDeck,
    SupplementalTable,
    Unknown,
}

impl DocumentType {
    pub const TYPED: [DocumentType; 3] = [
        DocumentType::EarningsRelease,
        DocumentType::SlideDeck,
        DocumentType::SupplementalTable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::EarningsRelease => "earnings_release",
            DocumentType::SlideDeck => "slide_deck",
            DocumentType::SupplementalTable => "supplemental_table",
            DocumentType::Unknown => "unknown",
        }
    }

    /// Lenient coercion of an untrusted label. Anything unrecognized is `Unknown`.
    pub fn coerce(raw: &str) -> DocumentType {
        let label = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match label.as_str() {
            "earnings_release" | "press_release" | "news_release" | "earnings" | "release" => {
                DocumentType::EarningsRelease
            }
            "slide_deck" | "slides" | "presentation" | "earnings_presentation" | "deck" => {
                DocumentType::SlideDeck
            }
            "supplemental_table" | "supplemental_tables" | "supplemental" | "financial_tables"
            | "supplemental_information" | "financial_data" => DocumentType::SupplementalTable,
            _ => DocumentType::Unknown,
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    /// Strict parse of the canonical names (used for configuration).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "earnings_release" => Ok(DocumentType::EarningsRelease),
            "slide_deck" => Ok(DocumentType::SlideDeck),
            "supplemental_table" => Ok(DocumentType::SupplementalTable),
            "unknown" => Ok(DocumentType::Unknown),
            other => Err(format!(
                "unknown document type '{other}' (expected earnings_release, slide_deck, supplemental_table or unknown)"
            )),
        }
    }
}

/// A normalized (fiscal year, quarter) pair. Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub year: i32,
    pub quarter: u8,
}

impl FiscalPeriod {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Self { year, quarter })
    }
}

impl fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{} {}", self.quarter, self.year)
    }
}

/// Which classifier produced a field.
/// Where a field value came from. Ordered so that heuristic values sort first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Heuristic,
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sourced<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> Sourced<T> {
    pub fn heuristic(value: T) -> Self {
        Self { value, provenance: Provenance::Heuristic }
    }

    pub fn inferred(value: T) -> Self {
        Self { value, provenance: Provenance::Inferred }
    }
}

/// A document instance that may turn out to be the latest report.
/// Never edited after creation; newer information produces a new candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCandidate {
    pub ticker: String,
    /// URL as found on the page (resolved to absolute).
    pub url: String,
    pub normalized_url: String,
    /// Raw title string; empty when the link had none.
    pub title: String,
    pub doc_type: Sourced<DocumentType>,
    pub fiscal_period: Option<Sourced<FiscalPeriod>>,
    pub published_at: Option<Sourced<DateTime<Utc>>>,
    pub discovered_at: DateTime<Utc>,
    /// Page the link was found on.
    pub source_page: String,
}

impl ReportCandidate {
    pub fn kind(&self) -> DocumentType {
        self.doc_type.value
    }

    pub fn period(&self) -> Option<FiscalPeriod> {
        self.fiscal_period.as_ref().map(|p| p.value)
    }

    pub fn published(&self) -> Option<DateTime<Utc>> {
        self.published_at.as_ref().map(|p| p.value)
    }
}
