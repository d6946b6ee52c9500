// src/selection/ranking.rs
//! Total orders over report candidates. `Ordering::Less` means "preferred".

use std::cmp::Ordering;

use crate::extractors::candidate::{Provenance, ReportCandidate};
use crate::extractors::heuristics::title_specificity;

/// `Some` beats `None`; between two `Some`s the larger value wins.
fn later_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Ranking inside one document-type group, most preferred first:
/// publication timestamp, fiscal period, title specificity, then normalized URL.
pub fn rank(a: &ReportCandidate, b: &ReportCandidate) -> Ordering {
    later_first(a.published(), b.published())
        .then_with(|| later_first(a.period(), b.period()))
        .then_with(|| title_specificity(&b.title).cmp(&title_specificity(&a.title)))
        .then_with(|| a.normalized_url.cmp(&b.normalized_url))
}

/// Field provenance as a comparable key; heuristic values before inferred ones.
fn provenance_key(c: &ReportCandidate) -> (Provenance, Option<Provenance>, Option<Provenance>) {
    (
        c.doc_type.provenance,
        c.fiscal_period.as_ref().map(|p| p.provenance),
        c.published_at.as_ref().map(|p| p.provenance),
    )
}

/// Which of two candidates sharing a normalized URL survives deduplication.
/// A dated candidate always wins; otherwise the most recently discovered one.
/// The remaining keys only make the choice independent of input order.
pub fn dedup_preference(a: &ReportCandidate, b: &ReportCandidate) -> Ordering {
    let dated = |c: &ReportCandidate| c.published_at.is_some();
    dated(b)
        .cmp(&dated(a))
        .then_with(|| b.discovered_at.cmp(&a.discovered_at))
        .then_with(|| rank(a, b))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.url.cmp(&b.url))
        .then_with(|| a.kind().cmp(&b.kind()))
        .then_with(|| a.source_page.cmp(&b.source_page))
        .then_with(|| provenance_key(a).cmp(&provenance_key(b)))
}
