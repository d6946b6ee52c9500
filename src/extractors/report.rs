// src/extractors/report.rs
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::candidate::{DocumentType, FiscalPeriod, ReportCandidate, Sourced};
use super::heuristics::{classify_document_type, parse_date, parse_fiscal_period, YearWindow};
use super::inference::{ExtractionSchema, InferenceCapability, ValidatedInference};
use super::units::{parse_page, ContentUnit};
use crate::navigator::RawPage;
use crate::registry::Company;
use crate::utils::urls::normalize_url;

/// A content unit (usually a whole page) that could not be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionSkip {
    pub source: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub candidates: Vec<ReportCandidate>,
    pub skips: Vec<ExtractionSkip>,
    pub ignored_links: usize,
    pub inference_calls: usize,
    pub inference_failures: usize,
    /// Inference answers rejected by schema validation (heuristic result kept).
    pub inference_fallbacks: usize,
}

/// First-phase result for one unit.
#[derive(Debug, Clone, PartialEq)]
struct Provisional {
    doc_type: Option<DocumentType>,
    fiscal_period: Option<FiscalPeriod>,
    published_at: Option<DateTime<Utc>>,
}

impl Provisional {
    fn classify(unit: &ContentUnit, years: YearWindow) -> Self {
        let declared_type = unit
            .declared_type
            .as_deref()
            .map(DocumentType::coerce)
            .filter(|t| *t != DocumentType::Unknown);
        let doc_type = declared_type
            .or_else(|| classify_document_type(&unit.title))
            .or_else(|| classify_document_type(&unit.url));

        let fiscal_period = parse_fiscal_period(&unit.title, years)
            .or_else(|| parse_fiscal_period(&unit.url, years))
            .or_else(|| parse_fiscal_period(&unit.context, years));

        let published_at = unit
            .declared_date
            .as_deref()
            .and_then(|d| parse_date(d, years))
            .or_else(|| parse_date(&unit.context, years))
            .or_else(|| parse_date(&unit.title, years))
            .or_else(|| parse_date(&unit.url, years));

        Self { doc_type, fiscal_period, published_at }
    }

    /// Heuristics could not settle the unit: no title or no readable date.
    fn is_inconclusive(&self, unit: &ContentUnit) -> bool {
        unit.title.trim().is_empty() || self.published_at.is_none()
    }
}

/// Turns retrieved pages into report candidates.
pub struct CandidateExtractor<'a> {
    inference: Option<&'a dyn InferenceCapability>,
    schema: ExtractionSchema,
    years: YearWindow,
}

impl<'a> CandidateExtractor<'a> {
    /// `as_of` anchors which years count as plausible; pass the run's start time.
    pub fn new(inference: Option<&'a dyn InferenceCapability>, as_of: DateTime<Utc>) -> Self {
        Self {
            inference,
            schema: ExtractionSchema::report_candidates(),
            years: YearWindow::as_of(as_of),
        }
    }

    pub async fn extract(&self, company: &Company, pages: &[RawPage]) -> ExtractionOutcome {
        let mut outcome = ExtractionOutcome::default();

        for page in pages {
            let parsed = match parse_page(page, self.years) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(ticker = %company.ticker, url = %page.final_url, "Skipping content unit: {}", e);
                    outcome.skips.push(ExtractionSkip {
                        source: page.final_url.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            outcome.ignored_links += parsed.ignored;

            let provisional: Vec<Provisional> = parsed.units.iter().map(|unit| Provisional::classify(unit, self.years)).collect();
            let inferred = self.infer_inconclusive(company, &parsed.units, &provisional, &mut outcome).await;

            for (unit, heuristic) in parsed.units.into_iter().zip(provisional) {
                let answer = inferred.get(&normalize_url(&unit.url));
                let candidate = build_candidate(company, unit, heuristic, answer, page.retrieved_at);
                tracing::debug!(
                    ticker = %company.ticker,
                    url = %candidate.url,
                    doc_type = %candidate.kind(),
                    "Candidate '{}' period={:?} published={:?}",
                    candidate.title,
                    candidate.period(),
                    candidate.published()
                );
                outcome.candidates.push(candidate);
            }
        }

        tracing::info!(
            ticker = %company.ticker,
            "Extracted {} candidates from {} pages ({} skipped, {} links ignored, {} inference calls)",
            outcome.candidates.len(),
            pages.len(),
            outcome.skips.len(),
            outcome.ignored_links,
            outcome.inference_calls
        );
        outcome
    }

    /// Sends all inconclusive units of one page in a single inference call and
    /// returns the validated answers keyed by normalized URL.
    async fn infer_inconclusive(
        &self,
        company: &Company,
        units: &[ContentUnit],
        provisional: &[Provisional],
        outcome: &mut ExtractionOutcome,
    ) -> HashMap<String, ValidatedInference> {
        let mut validated = HashMap::new();
        let Some(inference) = self.inference else {
            return validated;
        };
        let inconclusive: Vec<&ContentUnit> = units
            .iter()
            .zip(provisional)
            .filter(|(unit, p)| p.is_inconclusive(unit))
            .map(|(unit, _)| unit)
            .collect();
        if inconclusive.is_empty() {
            return validated;
        }

        let text = inconclusive.iter().map(|u| u.describe()).collect::<Vec<_>>().join("\n");
        outcome.inference_calls += 1;
        let answers = match inference.infer(&text, &self.schema).await {
            Ok(answers) => answers,
            Err(e) => {
                tracing::warn!(ticker = %company.ticker, "Inference failed, keeping heuristic results: {}", e);
                outcome.inference_failures += 1;
                return validated;
            }
        };

        let wanted: HashSet<String> = inconclusive.iter().map(|u| normalize_url(&u.url)).collect();
        for answer in answers {
            let Some(key) = answer.url.as_deref().map(normalize_url) else {
                outcome.inference_fallbacks += 1;
                continue;
            };
            if !wanted.contains(&key) {
                tracing::debug!(ticker = %company.ticker, url = %key, "Ignoring inferred report for a link that was not asked about");
                continue;
            }
            match answer.validate(&self.schema, self.years) {
                Ok(valid) => {
                    validated.insert(key, valid);
                }
                Err(missing) => {
                    tracing::debug!(ticker = %company.ticker, url = %key, "Inferred report missing {:?}, using heuristics", missing);
                    outcome.inference_fallbacks += 1;
                }
            }
        }
        validated
    }
}

fn build_candidate(
    company: &Company,
    unit: ContentUnit,
    heuristic: Provisional,
    inferred: Option<&ValidatedInference>,
    discovered_at: DateTime<Utc>,
) -> ReportCandidate {
    let heuristic_type = Sourced::heuristic(heuristic.doc_type.unwrap_or(DocumentType::Unknown));
    let heuristic_period = heuristic.fiscal_period.map(Sourced::heuristic);
    let heuristic_date = heuristic.published_at.map(Sourced::heuristic);

    let (title, doc_type, fiscal_period, published_at) = match inferred {
        Some(answer) => (
            if unit.title.is_empty() { answer.title.clone() } else { unit.title.clone() },
            Sourced::inferred(answer.doc_type),
            answer.fiscal_period.map(Sourced::inferred).or(heuristic_period),
            answer.published_at.map(Sourced::inferred).or(heuristic_date),
        ),
        None => (unit.title.clone(), heuristic_type, heuristic_period, heuristic_date),
    };

    ReportCandidate {
        ticker: company.ticker.clone(),
        normalized_url: normalize_url(&unit.url),
        url: unit.url,
        title,
        doc_type,
        fiscal_period,
        published_at,
        discovered_at,
        source_page: unit.source_page,
    }
}
