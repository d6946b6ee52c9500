// src/verify/report.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{CompanyRun, CompanyStatus, FetchFailureRecord};
use crate::extractors::candidate::{DocumentType, FiscalPeriod};
use crate::selection::SelectionAmbiguity;
use crate::storage::{keys, write_json, BlobStore};
use crate::utils::error::StorageError;

/// One selected document as it appears in the run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedDocument {
    pub doc_type: DocumentType,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fiscal_period: Option<FiscalPeriod>,
    pub content_hash: Option<String>,
    pub storage_key: Option<String>,
    pub reused: bool,
    pub via_unknown_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanySummary {
    pub ticker: String,
    pub company: String,
    pub status: CompanyStatus,
    pub ir_url: Option<String>,
    pub discovery_failures: usize,
    pub pages_retrieved: usize,
    pub candidates_discovered: usize,
    pub extraction_skips: usize,
    pub links_ignored: usize,
    pub inference_failures: usize,
    pub inference_fallbacks: usize,
    pub duplicates_collapsed: usize,
    /// Present when selection had to fall back to untyped candidates.
    pub ambiguity: Option<SelectionAmbiguity>,
    pub unknown_discarded: usize,
    pub selections: Vec<SelectedDocument>,
    pub fetch_failures: Vec<FetchFailureRecord>,
    pub conversions: usize,
    pub conversion_failures: usize,
    pub notes: Vec<String>,
}

/// Summary of one pipeline execution. Built once, never changed afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub companies_processed: usize,
    pub candidates_discovered: usize,
    pub selections_made: usize,
    pub fetch_successes: usize,
    pub fetch_failures: usize,
    pub extraction_skips: usize,
    pub discovery_failures: usize,
    pub per_company_status: BTreeMap<String, CompanyStatus>,
    pub status_counts: BTreeMap<CompanyStatus, usize>,
    /// Sorted by ticker.
    pub companies: Vec<CompanySummary>,
}

impl RunReport {
    /// Storage key the report is written under, derived from the start time.
    pub fn storage_key(&self) -> String {
        keys::run_report(&self.started_at.format("%Y%m%d_%H%M%S").to_string())
    }

    pub fn persist(&self, store: &dyn BlobStore) -> Result<String, StorageError> {
        let key = self.storage_key();
        write_json(store, &key, self)?;
        tracing::info!("Run report written to {}", key);
        Ok(key)
    }

    pub fn count(&self, status: CompanyStatus) -> usize {
        self.status_counts.get(&status).copied().unwrap_or(0)
    }
}

/// Single aggregator for per-company results; one `add` per company, in any order.
pub struct RunReportBuilder {
    started_at: DateTime<Utc>,
    companies: Vec<CompanySummary>,
    fetch_successes: usize,
    fetch_failures: usize,
}

impl RunReportBuilder {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            companies: Vec::new(),
            fetch_successes: 0,
            fetch_failures: 0,
        }
    }

    pub fn add(&mut self, run: &CompanyRun, status: CompanyStatus, mut notes: Vec<String>) {
        let selections = run
            .selections
            .iter()
            .map(|selection| {
                let fetched = run.fetched.iter().find(|d| d.doc_type == selection.doc_type);
                SelectedDocument {
                    doc_type: selection.doc_type,
                    title: selection.chosen.title.clone(),
                    url: selection.chosen.url.clone(),
                    published_at: selection.chosen.published(),
                    fiscal_period: selection.chosen.period(),
                    content_hash: fetched.map(|d| d.content_hash.clone()),
                    storage_key: fetched.map(|d| d.storage_key.clone()),
                    reused: fetched.is_some_and(|d| d.reused),
                    via_unknown_fallback: selection.via_unknown_fallback,
                }
            })
            .collect();
        notes.extend(run.discovery_failures.iter().map(|f| format!("discovery: {f}")));
        if let Some(ambiguity) = &run.ambiguity {
            notes.push(format!(
                "no typed candidates, selected from {} unknown-typed candidates",
                ambiguity.unknown_candidates
            ));
        }
        notes.extend(run.errors.iter().cloned());

        self.fetch_successes += run.fetched.len();
        self.fetch_failures += run.fetch_failures.len();

        match status {
            CompanyStatus::Complete => tracing::info!(ticker = %run.ticker, "Company verified: {:?}", status),
            _ => tracing::warn!(ticker = %run.ticker, "Company verified: {:?} ({})", status, notes.join("; ")),
        }

        self.companies.push(CompanySummary {
            ticker: run.ticker.clone(),
            company: run.name.clone(),
            status,
            ir_url: run.ir_url.clone(),
            discovery_failures: run.discovery_failures.len(),
            pages_retrieved: run.pages_retrieved,
            candidates_discovered: run.candidates_discovered,
            extraction_skips: run.extraction_skips,
            links_ignored: run.links_ignored,
            inference_failures: run.inference_failures,
            inference_fallbacks: run.inference_fallbacks,
            duplicates_collapsed: run.duplicates_collapsed,
            ambiguity: run.ambiguity.clone(),
            unknown_discarded: run.unknown_discarded,
            selections,
            fetch_failures: run.fetch_failures.clone(),
            conversions: run.conversions,
            conversion_failures: run.conversion_failures,
            notes,
        });
    }

    pub fn finish(mut self) -> RunReport {
        self.companies.sort_by(|a, b| a.ticker.cmp(&b.ticker));

        let mut status_counts = BTreeMap::new();
        for company in &self.companies {
            *status_counts.entry(company.status).or_insert(0) += 1;
        }

        RunReport {
            started_at: self.started_at,
            finished_at: Utc::now(),
            companies_processed: self.companies.len(),
            candidates_discovered: self.companies.iter().map(|c| c.candidates_discovered).sum(),
            selections_made: self.companies.iter().map(|c| c.selections.len()).sum(),
            fetch_successes: self.fetch_successes,
            fetch_failures: self.fetch_failures,
            extraction_skips: self.companies.iter().map(|c| c.extraction_skips).sum(),
            discovery_failures: self.companies.iter().map(|c| c.discovery_failures).sum(),
            per_company_status: self.companies.iter().map(|c| (c.ticker.clone(), c.status)).collect(),
            status_counts,
            companies: self.companies,
        }
    }
}
