// src/verify/mod.rs
pub mod report;

use std::collections::BTreeSet;

use serde::Serialize;

use crate::extractors::candidate::DocumentType;
use crate::fetch::FetchedDocument;
use crate::registry::Company;
use crate::selection::{SelectionAmbiguity, SelectionResult};
use crate::storage::{keys, BlobStore};

pub use report::RunReport;
use report::RunReportBuilder;

/// Verification outcome for one company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyStatus {
    Complete,
    Partial,
    Empty,
    FetchFailed,
    /// The run timed out before this company finished.
    Abandoned,
}

/// A fetch that did not produce a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailureRecord {
    pub doc_type: DocumentType,
    pub url: String,
    pub kind: &'static str,
    pub error: String,
}

/// Everything the pipeline produced for one company, handed to verification.
#[derive(Debug, Clone, Default)]
pub struct CompanyRun {
    pub ticker: String,
    pub name: String,
    pub ir_url: Option<String>,
    pub discovery_error: Option<String>,
    /// Seeds or links that failed while discovery as a whole succeeded.
    pub discovery_failures: Vec<String>,
    pub pages_retrieved: usize,
    pub candidates_discovered: usize,
    pub extraction_skips: usize,
    pub links_ignored: usize,
    pub inference_failures: usize,
    pub inference_fallbacks: usize,
    pub duplicates_collapsed: usize,
    pub ambiguity: Option<SelectionAmbiguity>,
    /// Unknown-typed candidates left out because typed ones existed.
    pub unknown_discarded: usize,
    pub selections: Vec<SelectionResult>,
    pub fetched: Vec<FetchedDocument>,
    pub fetch_failures: Vec<FetchFailureRecord>,
    pub conversions: usize,
    pub conversion_failures: usize,
    /// Artifact writes that failed (non-fatal).
    pub errors: Vec<String>,
    pub abandoned: bool,
}

impl CompanyRun {
    pub fn new(company: &Company) -> Self {
        Self {
            ticker: company.ticker.clone(),
            name: company.name.clone(),
            ..Default::default()
        }
    }

    pub fn abandoned(company: &Company) -> Self {
        Self {
            abandoned: true,
            ..Self::new(company)
        }
    }
}

/// Classifies a company's run. Purely observational: reads storage, never writes.
pub fn verify_company(run: &CompanyRun, store: &dyn BlobStore, expected_types: &[DocumentType]) -> (CompanyStatus, Vec<String>) {
    let mut notes = Vec::new();
    if run.abandoned {
        notes.push("run timed out before this company finished".to_string());
        return (CompanyStatus::Abandoned, notes);
    }
    if run.selections.is_empty() {
        notes.push(match &run.discovery_error {
            Some(e) => e.clone(),
            None => format!("no report candidates among {} candidates discovered", run.candidates_discovered),
        });
        return (CompanyStatus::Empty, notes);
    }

    let mut resolved: BTreeSet<DocumentType> = BTreeSet::new();
    for selection in &run.selections {
        let document = run.fetched.iter().find(|d| d.doc_type == selection.doc_type);
        match document {
            Some(doc) if doc.size > 0 => match store.exists(&doc.storage_key) {
                Ok(true) => {
                    resolved.insert(selection.doc_type);
                }
                Ok(false) => notes.push(format!("{} missing from storage at {}", selection.doc_type, doc.storage_key)),
                Err(e) => notes.push(format!("could not check {}: {}", doc.storage_key, e)),
            },
            Some(doc) => notes.push(format!("{} stored empty at {}", selection.doc_type, doc.storage_key)),
            None => notes.push(format!("{} selected but not fetched ({})", selection.doc_type, selection.chosen.url)),
        }
    }
    if resolved.is_empty() {
        return (CompanyStatus::FetchFailed, notes);
    }

    let missing: Vec<&str> = expected_types
        .iter()
        .filter(|t| !resolved.contains(*t))
        .map(|t| t.as_str())
        .collect();
    if !missing.is_empty() {
        notes.push(format!("expected types not resolved: {}", missing.join(", ")));
    }
    let all_resolved = missing.is_empty() && resolved.len() == run.selections.len();

    let hashes: BTreeSet<&str> = run.fetched.iter().map(|d| d.content_hash.as_str()).collect();
    let files_ok = match store.list(&keys::documents_prefix(&run.ticker)) {
        Ok(files) if files.len() >= hashes.len() => true,
        Ok(files) => {
            notes.push(format!(
                "{} stored documents but {} distinct documents fetched",
                files.len(),
                hashes.len()
            ));
            false
        }
        Err(e) => {
            notes.push(format!("could not list stored documents: {}", e));
            false
        }
    };

    let status = if all_resolved && files_ok {
        CompanyStatus::Complete
    } else {
        CompanyStatus::Partial
    };
    (status, notes)
}

/// Verifies every company and aggregates the run report.
pub fn verify(
    runs: &[CompanyRun],
    store: &dyn BlobStore,
    expected_types: &[DocumentType],
    started_at: chrono::DateTime<chrono::Utc>,
) -> RunReport {
    let mut builder = RunReportBuilder::new(started_at);
    for run in runs {
        let (status, notes) = verify_company(run, store, expected_types);
        builder.add(run, status, notes);
    }
    builder.finish()
}
