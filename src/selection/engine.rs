// src/selection/engine.rs
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::ranking::{dedup_preference, rank};
use crate::extractors::candidate::{DocumentType, ReportCandidate};

#[derive(Debug, Clone)]
pub struct SelectionConfig {
    /// Upper bound on runner-ups kept per selection.
    pub max_runner_ups: usize,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self { max_runner_ups: 5 }
    }
}

/// The authoritative latest report for one (company, document type) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionResult {
    pub ticker: String,
    pub doc_type: DocumentType,
    pub chosen: ReportCandidate,
    /// Remaining candidates of the group, best first.
    pub runner_ups: Vec<ReportCandidate>,
    /// Chosen from `unknown`-typed candidates because nothing typed existed.
    pub via_unknown_fallback: bool,
}

/// Selection fell back to candidates whose type could not be determined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionAmbiguity {
    pub ticker: String,
    pub unknown_candidates: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionOutcome {
    pub results: BTreeMap<DocumentType, SelectionResult>,
    pub duplicates_collapsed: usize,
    /// `unknown` candidates left out because typed candidates existed.
    pub unknown_discarded: usize,
    pub ambiguity: Option<SelectionAmbiguity>,
}

impl SelectionOutcome {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

pub struct SelectionEngine {
    config: SelectionConfig,
}

impl SelectionEngine {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    /// Chooses the latest report per document type. The result depends only on
    /// the contents of `candidates`, never on their order.
    pub fn select(&self, ticker: &str, candidates: &[ReportCandidate]) -> SelectionOutcome {
        let mut outcome = SelectionOutcome::default();

        let unique = deduplicate(candidates);
        outcome.duplicates_collapsed = candidates.len() - unique.len();
        if outcome.duplicates_collapsed > 0 {
            tracing::debug!(ticker, "Collapsed {} duplicate candidates", outcome.duplicates_collapsed);
        }

        let mut groups: BTreeMap<DocumentType, Vec<ReportCandidate>> = BTreeMap::new();
        for candidate in unique {
            groups.entry(candidate.kind()).or_default().push(candidate);
        }

        let unknown = groups.remove(&DocumentType::Unknown).unwrap_or_default();
        let fallback = groups.is_empty() && !unknown.is_empty();
        if fallback {
            tracing::warn!(
                ticker,
                "No typed candidates; selecting among {} candidates of unknown type",
                unknown.len()
            );
            outcome.ambiguity = Some(SelectionAmbiguity {
                ticker: ticker.to_string(),
                unknown_candidates: unknown.len(),
            });
            groups.insert(DocumentType::Unknown, unknown);
        } else {
            outcome.unknown_discarded = unknown.len();
        }

        for (doc_type, mut group) in groups {
            group.sort_by(rank);
            let mut ranked = group.into_iter();
            let Some(chosen) = ranked.next() else {
                continue;
            };
            let runner_ups: Vec<ReportCandidate> = ranked.take(self.config.max_runner_ups).collect();
            tracing::info!(
                ticker,
                doc_type = %doc_type,
                url = %chosen.url,
                "Selected '{}' (published {:?}, period {:?}) over {} runner-ups",
                chosen.title,
                chosen.published(),
                chosen.period(),
                runner_ups.len()
            );
            outcome.results.insert(
                doc_type,
                SelectionResult {
                    ticker: ticker.to_string(),
                    doc_type,
                    chosen,
                    runner_ups,
                    via_unknown_fallback: fallback,
                },
            );
        }

        if outcome.is_empty() {
            tracing::info!(ticker, "No candidates to select from");
        }
        outcome
    }
}

/// One candidate per normalized URL, chosen by `dedup_preference`.
fn deduplicate(candidates: &[ReportCandidate]) -> Vec<ReportCandidate> {
    let mut best: HashMap<&str, &ReportCandidate> = HashMap::new();
    for candidate in candidates {
        best.entry(candidate.normalized_url.as_str())
            .and_modify(|current| {
                if dedup_preference(candidate, *current).is_lt() {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }
    best.into_values().cloned().collect()
}
