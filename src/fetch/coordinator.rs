// src/fetch/coordinator.rs
use chrono::Utc;

use super::{FetchedDocument, RetryPolicy, UrlIndexEntry};
use crate::extractors::heuristics::document_extension;
use crate::navigator::{PageRetriever, RawPage, RenderPolicy};
use crate::selection::SelectionResult;
use crate::storage::{keys, read_json, write_json, BlobStore};
use crate::utils::error::{FetchFailure, RetrievalError};
use crate::utils::urls::{normalize_url, sha256_hex, url_key};

/// Downloads selected documents into content-addressed storage.
pub struct FetchCoordinator<'a> {
    retriever: &'a dyn PageRetriever,
    store: &'a dyn BlobStore,
    policy: RetryPolicy,
}

impl<'a> FetchCoordinator<'a> {
    pub fn new(retriever: &'a dyn PageRetriever, store: &'a dyn BlobStore, policy: RetryPolicy) -> Self {
        Self { retriever, store, policy }
    }

    pub async fn fetch(&self, selection: &SelectionResult) -> Result<FetchedDocument, FetchFailure> {
        let ticker = selection.ticker.as_str();
        let url = selection.chosen.url.as_str();
        let index_key = keys::url_index(ticker, &url_key(url));

        if let Some(existing) = self.lookup_index(ticker, &index_key)? {
            tracing::info!(ticker, url, hash = %existing.content_hash, "Document already stored, skipping download");
            return Ok(for_selection(existing, selection));
        }

        let page = self.retrieve_with_retry(ticker, url).await?;
        validate_payload(url, &page).map_err(FetchFailure::Permanent)?;

        let content_hash = sha256_hex(&page.body);
        let document = match self.stored_record(&content_hash, ticker)? {
            Some(existing) => {
                tracing::info!(ticker, url, hash = %content_hash, "Identical content already stored as {}", existing.storage_key);
                for_selection(existing, selection)
            }
            None => {
                let media_type = page.media_type();
                let ext = blob_extension(url, media_type.as_deref());
                let storage_key = keys::document(ticker, selection.doc_type.as_str(), &content_hash, &ext);
                let document = FetchedDocument {
                    ticker: ticker.to_string(),
                    doc_type: selection.doc_type,
                    source_url: url.to_string(),
                    content_hash: content_hash.clone(),
                    media_type,
                    size: page.body.len() as u64,
                    storage_key,
                    fetched_at: Utc::now(),
                    reused: false,
                };
                if !self.store.exists(&document.storage_key)? {
                    self.store.write(&document.storage_key, &page.body)?;
                }
                write_json(self.store, &keys::record(ticker, &content_hash), &document)?;
                tracing::info!(ticker, url, hash = %content_hash, "Stored {} bytes at {}", document.size, document.storage_key);
                document
            }
        };

        let entry = UrlIndexEntry {
            url: normalize_url(url),
            content_hash,
        };
        write_json(self.store, &index_key, &entry)?;
        Ok(document)
    }

    /// A previously fetched document for this URL whose blob is still present.
    fn lookup_index(&self, ticker: &str, index_key: &str) -> Result<Option<FetchedDocument>, FetchFailure> {
        let Some(entry) = read_json::<UrlIndexEntry>(self.store, index_key)? else {
            return Ok(None);
        };
        Ok(self.stored_record(&entry.content_hash, ticker)?.map(|mut doc| {
            doc.reused = true;
            doc
        }))
    }

    fn stored_record(&self, content_hash: &str, ticker: &str) -> Result<Option<FetchedDocument>, FetchFailure> {
        let Some(mut record) = read_json::<FetchedDocument>(self.store, &keys::record(ticker, content_hash))? else {
            return Ok(None);
        };
        if record.size == 0 || !self.store.exists(&record.storage_key)? {
            tracing::warn!(ticker, hash = content_hash, "Record without a usable blob, fetching again");
            return Ok(None);
        }
        record.reused = true;
        Ok(Some(record))
    }

    async fn retrieve_with_retry(&self, ticker: &str, url: &str) -> Result<RawPage, FetchFailure> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.retriever.retrieve(url, RenderPolicy::Static).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::warn!(ticker, url, attempt, "Transient fetch failure, retrying in {:?}: {}", delay, e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_transient() => {
                    tracing::error!(ticker, url, attempt, "Giving up after {} attempts: {}", attempt, e);
                    return Err(FetchFailure::Transient { attempts: attempt, source: e });
                }
                Err(e) => {
                    tracing::error!(ticker, url, "Permanent fetch failure: {}", e);
                    return Err(FetchFailure::Permanent(e));
                }
            }
        }
    }
}

/// Rebinds a stored record to the selection being fetched; the blob is shared by
/// every URL that served the same bytes, the type and source are not.
fn for_selection(record: FetchedDocument, selection: &SelectionResult) -> FetchedDocument {
    FetchedDocument {
        doc_type: selection.doc_type,
        source_url: selection.chosen.url.clone(),
        reused: true,
        ..record
    }
}

/// Rejects payloads that can never become a valid document.
fn validate_payload(url: &str, page: &RawPage) -> Result<(), RetrievalError> {
    if page.body.is_empty() {
        return Err(RetrievalError::EmptyBody(url.to_string()));
    }
    let Some(media_type) = page.media_type() else {
        return Ok(());
    };
    let well_formed = media_type
        .split_once('/')
        .is_some_and(|(kind, sub)| !kind.is_empty() && !sub.is_empty() && !sub.contains('/'));
    // A document URL answered with an HTML page is a login or cookie interstitial
    let interstitial = media_type == "text/html" && document_extension(url).is_some();
    if !well_formed || interstitial {
        return Err(RetrievalError::ContentType {
            url: url.to_string(),
            content_type: page.content_type.clone().unwrap_or_default(),
        });
    }
    Ok(())
}

fn blob_extension(url: &str, media_type: Option<&str>) -> String {
    if let Some(ext) = document_extension(url) {
        return ext;
    }
    let ext = match media_type.unwrap_or_default() {
        "application/pdf" => "pdf",
        "text/html" | "application/xhtml+xml" => "html",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/zip" => "zip",
        "text/plain" => "txt",
        _ => "bin",
    };
    ext.to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;
    use crate::extractors::candidate::{DocumentType, ReportCandidate, Sourced};
    use crate::navigator::testing::ScriptedRetriever;
    use crate::storage::testing::MemoryBlobStore;
    use crate::storage::FsBlobStore;

    const PDF_URL: &str = "https://ir.example.com/files/q3-2025-release.pdf";
    const PDF_BYTES: &[u8] = b"%PDF-1.7 quarterly results";

    fn selection(url: &str) -> SelectionResult {
        SelectionResult {
            ticker: "AAPL".into(),
            doc_type: DocumentType::EarningsRelease,
            chosen: ReportCandidate {
                ticker: "AAPL".into(),
                url: url.into(),
                normalized_url: normalize_url(url),
                title: "Q3 2025 Earnings Release".into(),
                doc_type: Sourced::heuristic(DocumentType::EarningsRelease),
                fiscal_period: None,
                published_at: None,
                discovered_at: Utc.with_ymd_and_hms(2025, 10, 31, 0, 0, 0).unwrap(),
                source_page: "https://ir.example.com".into(),
            },
            runner_ups: vec![],
            via_unknown_fallback: false,
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_fetch_twice_stores_one_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        let retriever = ScriptedRetriever::new().bytes(PDF_URL, "application/pdf", PDF_BYTES);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        let first = coordinator.fetch(&selection(PDF_URL)).await.unwrap();
        let second = coordinator.fetch(&selection(PDF_URL)).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(retriever.calls_for(PDF_URL), 1);

        let blobs = store.list("AAPL/documents").unwrap();
        assert_eq!(blobs, vec![format!("AAPL/documents/earnings_release/{}.pdf", first.content_hash)]);
        let stored = store.read(&blobs[0]).unwrap().unwrap();
        assert_eq!(sha256_hex(&stored), first.content_hash);
    }

    #[tokio::test]
    async fn test_same_bytes_under_new_url_not_rewritten() {
        let store = MemoryBlobStore::default();
        let mirror = "https://cdn.example.com/mirror/q3.pdf";
        let retriever = ScriptedRetriever::new()
            .bytes(PDF_URL, "application/pdf", PDF_BYTES)
            .bytes(mirror, "application/pdf", PDF_BYTES);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        let first = coordinator.fetch(&selection(PDF_URL)).await.unwrap();
        let second = coordinator.fetch(&selection(mirror)).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.storage_key, first.storage_key);
        assert_eq!(store.writes_to(&first.storage_key), 1);
    }

    #[tokio::test]
    async fn test_identical_bytes_keep_each_selection_identity() {
        let store = MemoryBlobStore::default();
        let tables = "https://ir.example.com/files/q3-2025-financial-tables.pdf";
        let retriever = ScriptedRetriever::new()
            .bytes(PDF_URL, "application/pdf", PDF_BYTES)
            .bytes(tables, "application/pdf", PDF_BYTES);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());
        let mut table_selection = selection(tables);
        table_selection.doc_type = DocumentType::SupplementalTable;

        let release = coordinator.fetch(&selection(PDF_URL)).await.unwrap();
        let table = coordinator.fetch(&table_selection).await.unwrap();
        assert_eq!(table.doc_type, DocumentType::SupplementalTable);
        assert_eq!(table.source_url, tables);
        assert_eq!(table.storage_key, release.storage_key);
        assert_eq!(release.doc_type, DocumentType::EarningsRelease);

        // Through the URL index on a later run
        let again = coordinator.fetch(&table_selection).await.unwrap();
        assert_eq!(again.doc_type, DocumentType::SupplementalTable);
        assert_eq!(again.source_url, tables);
        assert_eq!(retriever.calls_for(tables), 1);
        assert_eq!(store.writes_to(&release.storage_key), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = MemoryBlobStore::default();
        let retriever = ScriptedRetriever::new()
            .status(PDF_URL, 503)
            .status(PDF_URL, 429)
            .bytes(PDF_URL, "application/pdf", PDF_BYTES);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        let document = coordinator.fetch(&selection(PDF_URL)).await.unwrap();
        assert_eq!(retriever.calls_for(PDF_URL), 3);
        assert_eq!(document.size, PDF_BYTES.len() as u64);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = MemoryBlobStore::default();
        let retriever = ScriptedRetriever::new().status(PDF_URL, 502);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        let failure = coordinator.fetch(&selection(PDF_URL)).await.unwrap_err();
        assert!(matches!(failure, FetchFailure::Transient { attempts: 3, .. }));
        assert_eq!(retriever.calls_for(PDF_URL), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let store = MemoryBlobStore::default();
        let retriever = ScriptedRetriever::new().status(PDF_URL, 404);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        let failure = coordinator.fetch(&selection(PDF_URL)).await.unwrap_err();
        assert_eq!(failure.kind(), "permanent");
        assert_eq!(retriever.calls_for(PDF_URL), 1);
    }

    #[tokio::test]
    async fn test_html_interstitial_is_permanent() {
        let store = MemoryBlobStore::default();
        let retriever = ScriptedRetriever::new().page(PDF_URL, "text/html; charset=utf-8", "<html>Please accept cookies</html>");
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        let failure = coordinator.fetch(&selection(PDF_URL)).await.unwrap_err();
        assert!(matches!(failure, FetchFailure::Permanent(RetrievalError::ContentType { .. })));
        assert!(store.list("AAPL").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_and_malformed_payloads() {
        let store = MemoryBlobStore::default();
        let odd = "https://ir.example.com/files/odd.pdf";
        let retriever = ScriptedRetriever::new()
            .bytes(PDF_URL, "application/pdf", b"")
            .bytes(odd, "pdf", PDF_BYTES);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        assert!(matches!(
            coordinator.fetch(&selection(PDF_URL)).await,
            Err(FetchFailure::Permanent(RetrievalError::EmptyBody(_)))
        ));
        assert!(matches!(
            coordinator.fetch(&selection(odd)).await,
            Err(FetchFailure::Permanent(RetrievalError::ContentType { .. }))
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let store = MemoryBlobStore::failing_under("AAPL/documents");
        let retriever = ScriptedRetriever::new().bytes(PDF_URL, "application/pdf", PDF_BYTES);
        let coordinator = FetchCoordinator::new(&retriever, &store, quick_policy());

        let failure = coordinator.fetch(&selection(PDF_URL)).await.unwrap_err();
        assert_eq!(failure.kind(), "storage");
        assert!(store.list("AAPL").unwrap().is_empty());
    }

    #[test]
    fn test_blob_extension() {
        assert_eq!(blob_extension(PDF_URL, Some("application/octet-stream")), "pdf");
        assert_eq!(blob_extension("https://ir.example.com/news/q3", Some("text/html")), "html");
        assert_eq!(blob_extension("https://ir.example.com/download?id=4", None), "bin");
    }
}
