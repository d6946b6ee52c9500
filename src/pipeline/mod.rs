// src/pipeline/mod.rs
pub mod artifacts;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::convert::DocumentConverter;
use crate::extractors::{CandidateExtractor, DocumentType, InferenceCapability};
use crate::fetch::{FetchCoordinator, FetchedDocument, RetryPolicy};
use crate::navigator::{NavigatorConfig, PageNavigator, PageRetriever};
use crate::registry::{Company, SourceRegistry};
use crate::selection::{SelectionConfig, SelectionEngine, SelectionResult};
use crate::storage::{keys, write_json, BlobStore};
use crate::utils::error::ConversionError;
use crate::verify::{self, CompanyRun, FetchFailureRecord, RunReport};
use artifacts::{ExtractedReportsRecord, IrDiscoveryRecord};

/// Settings shared by every stage of a run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_workers: usize,
    pub navigator: NavigatorConfig,
    pub selection: SelectionConfig,
    pub retry: RetryPolicy,
    /// Types a company must resolve to count as complete.
    pub expected_types: Vec<DocumentType>,
    pub run_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            navigator: NavigatorConfig::default(),
            selection: SelectionConfig::default(),
            retry: RetryPolicy::default(),
            expected_types: vec![DocumentType::EarningsRelease],
            run_timeout: None,
        }
    }
}

pub struct Pipeline {
    retriever: Arc<dyn PageRetriever>,
    inference: Option<Arc<dyn InferenceCapability>>,
    store: Arc<dyn BlobStore>,
    converter: Arc<dyn DocumentConverter>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        retriever: Arc<dyn PageRetriever>,
        store: Arc<dyn BlobStore>,
        converter: Arc<dyn DocumentConverter>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            retriever,
            inference: None,
            store,
            converter,
            config,
        }
    }

    pub fn with_inference(mut self, inference: Arc<dyn InferenceCapability>) -> Self {
        self.inference = Some(inference);
        self
    }

    /// Processes every registry company through a bounded worker pool and returns
    /// the run report. Company failures are recorded, never propagated.
    pub async fn run(&self, registry: &SourceRegistry) -> RunReport {
        let started_at = Utc::now();
        let deadline = self.config.run_timeout.map(|t| tokio::time::Instant::now() + t);
        let workers = self.config.max_workers.max(1);
        tracing::info!("Processing {} companies with {} workers", registry.len(), workers);

        let mut pending: BTreeMap<&str, &Company> =
            registry.companies().iter().map(|c| (c.ticker.as_str(), c)).collect();
        let mut runs = Vec::with_capacity(registry.len());

        let mut outcomes = stream::iter(registry.companies())
            .map(|company| self.process_company(company, started_at))
            .buffer_unordered(workers);

        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, outcomes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        tracing::warn!("Run timeout reached with {} companies unfinished", pending.len());
                        break;
                    }
                },
                None => outcomes.next().await,
            };
            let Some(run) = next else {
                break;
            };
            pending.remove(run.ticker.as_str());
            runs.push(run);
        }
        // Dropping the stream cancels in-flight companies
        drop(outcomes);

        runs.extend(pending.into_values().map(CompanyRun::abandoned));

        let report = verify::verify(&runs, self.store.as_ref(), &self.config.expected_types, started_at);
        tracing::info!(
            "Run finished: {} companies, {} selections, {} fetched, {} fetch failures",
            report.companies_processed,
            report.selections_made,
            report.fetch_successes,
            report.fetch_failures
        );
        report
    }

    async fn process_company(&self, company: &Company, started_at: DateTime<Utc>) -> CompanyRun {
        tracing::info!(ticker = %company.ticker, "Processing {}", company.name);
        let mut run = CompanyRun::new(company);
        self.collect(company, started_at, &mut run).await;
        run
    }

    /// Discovery, extraction, selection and fetch for one company, in order.
    async fn collect(&self, company: &Company, started_at: DateTime<Utc>, run: &mut CompanyRun) {
        let ticker = company.ticker.as_str();

        let navigator = PageNavigator::new(self.retriever.as_ref(), self.config.navigator.clone());
        let discovery = match navigator.discover(company).await {
            Ok(discovery) => discovery,
            Err(e) => {
                tracing::error!(ticker, "Discovery failed: {}", e);
                run.discovery_error = Some(e.to_string());
                return;
            }
        };
        run.ir_url = Some(discovery.ir_url.clone());
        run.pages_retrieved = discovery.pages.len();
        run.discovery_failures = discovery.failures;
        let ir_record = IrDiscoveryRecord {
            company: company.name.clone(),
            ticker: ticker.to_string(),
            ir_url: discovery.ir_url.clone(),
            discovered_at: Utc::now(),
        };
        self.save(run, &keys::ir_discovery(ticker), &ir_record);

        let extractor = CandidateExtractor::new(self.inference.as_deref(), started_at);
        let extracted = extractor.extract(company, &discovery.pages).await;
        run.candidates_discovered = extracted.candidates.len();
        run.extraction_skips = extracted.skips.len();
        run.links_ignored = extracted.ignored_links;
        run.inference_failures = extracted.inference_failures;
        run.inference_fallbacks = extracted.inference_fallbacks;
        self.save(
            run,
            &keys::extracted_reports(ticker),
            &ExtractedReportsRecord::new(company, &extracted.candidates),
        );

        let outcome = SelectionEngine::new(self.config.selection.clone()).select(ticker, &extracted.candidates);
        run.duplicates_collapsed = outcome.duplicates_collapsed;
        run.ambiguity = outcome.ambiguity;
        run.unknown_discarded = outcome.unknown_discarded;
        let selections: Vec<SelectionResult> = outcome.results.into_values().collect();
        if selections.is_empty() {
            return;
        }
        self.save(run, &keys::selections(ticker), &selections);

        let coordinator = FetchCoordinator::new(self.retriever.as_ref(), self.store.as_ref(), self.config.retry);
        for selection in &selections {
            match coordinator.fetch(selection).await {
                Ok(document) => {
                    self.convert(run, &document);
                    run.fetched.push(document);
                }
                Err(e) => {
                    tracing::error!(ticker, url = %selection.chosen.url, "Fetch failed ({}): {}", e.kind(), e);
                    run.fetch_failures.push(FetchFailureRecord {
                        doc_type: selection.doc_type,
                        url: selection.chosen.url.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }
        run.selections = selections;
    }

    /// Stores the text and tables of a fetched document once per content hash.
    fn convert(&self, run: &mut CompanyRun, document: &FetchedDocument) {
        let Some(media_type) = document.media_type.as_deref() else {
            return;
        };
        let key = keys::extracted(&document.ticker, &document.content_hash);
        if matches!(self.store.exists(&key), Ok(true)) {
            return;
        }
        let bytes = match self.store.read(&document.storage_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                run.errors.push(format!("could not read {}: {}", document.storage_key, e));
                return;
            }
        };
        match self.converter.convert(&bytes, media_type) {
            Ok(converted) => {
                run.conversions += 1;
                self.save(run, &key, &converted);
            }
            Err(ConversionError::Unsupported(media)) => {
                tracing::debug!(ticker = %document.ticker, "No converter for {}", media);
            }
            Err(e) => {
                tracing::warn!(ticker = %document.ticker, key = %document.storage_key, "Conversion failed: {}", e);
                run.conversion_failures += 1;
            }
        }
    }

    /// Writes a JSON artifact; a failure is recorded on the company, never fatal.
    fn save<T: Serialize + ?Sized>(&self, run: &mut CompanyRun, key: &str, value: &T) {
        if let Err(e) = write_json(self.store.as_ref(), key, value) {
            tracing::error!(ticker = %run.ticker, "Failed to write {}: {}", key, e);
            run.errors.push(format!("failed to write {}: {}", key, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::convert::HtmlConverter;
    use crate::extractors::inference::{ExtractionSchema, InferredReport};
    use crate::navigator::testing::ScriptedRetriever;
    use crate::navigator::{RawPage, RenderPolicy};
    use crate::storage::testing::MemoryBlobStore;
    use crate::storage::{read_json, FsBlobStore};
    use crate::utils::error::{InferenceError, RetrievalError};
    use crate::verify::CompanyStatus;

    fn ir_page(ticker: &str) -> String {
        format!(
            r#"<html><body>
            <nav><a href="/quarterly-results">Quarterly Results</a> <a href="/careers">Careers</a></nav>
            <ul>
              <li>October 30, 2025 <a href="/files/{t}-q3-2025-earnings-release.pdf">Q3 2025 Earnings Release</a></li>
              <li>July 31, 2025 <a href="/files/{t}-q2-2025-earnings-release.pdf">Q2 2025 Earnings Release</a></li>
              <li>October 30, 2025 <a href="/files/{t}-q3-2025-slides.pdf">Q3 2025 Earnings Presentation</a></li>
            </ul></body></html>"#,
            t = ticker.to_lowercase()
        )
    }

    fn registry(tickers: &[&str]) -> SourceRegistry {
        let entries: Vec<serde_json::Value> = tickers
            .iter()
            .map(|t| {
                serde_json::json!({
                    "ticker": t,
                    "name": format!("{t} Corp"),
                    "seeds": [{"ir_url": format!("https://ir.{}.example.com/", t.to_lowercase())}],
                })
            })
            .collect();
        SourceRegistry::from_json_str(&serde_json::Value::Array(entries).to_string()).unwrap()
    }

    fn scripted(tickers: &[&str]) -> ScriptedRetriever {
        let mut retriever = ScriptedRetriever::new();
        for t in tickers {
            let lower = t.to_lowercase();
            let base = format!("https://ir.{lower}.example.com");
            retriever = retriever
                .page(&format!("{base}/"), "text/html", &ir_page(t))
                .page(
                    &format!("{base}/quarterly-results"),
                    "text/html",
                    &format!(
                        r#"<p>October 30, 2025 <a href="/files/{lower}-q3-2025-earnings-release.pdf">Q3 2025 Earnings Release</a></p>
                           <p><a href="/events/q3-2025-call-replay">Q3 2025 Earnings Call Replay</a></p>"#
                    ),
                )
                .bytes(&format!("{base}/files/{lower}-q3-2025-earnings-release.pdf"), "application/pdf", format!("%PDF release {t}").as_bytes())
                .bytes(&format!("{base}/files/{lower}-q3-2025-slides.pdf"), "application/pdf", format!("%PDF slides {t}").as_bytes());
        }
        retriever
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_workers: 2,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_run_and_rerun() {
        let dir = tempfile::TempDir::new().unwrap();
        let store: Arc<FsBlobStore> = Arc::new(FsBlobStore::new(dir.path()).unwrap());
        let retriever = Arc::new(scripted(&["ACME"]));
        let pipeline = Pipeline::new(retriever.clone(), store.clone(), Arc::new(HtmlConverter), config());
        let registry = registry(&["ACME"]);

        let report = pipeline.run(&registry).await;
        assert_eq!(report.companies_processed, 1);
        assert_eq!(report.per_company_status["ACME"], CompanyStatus::Complete);
        assert_eq!(report.selections_made, 2);
        assert_eq!(report.fetch_successes, 2);

        let summary = &report.companies[0];
        assert_eq!(summary.duplicates_collapsed, 1);
        assert_eq!(summary.pages_retrieved, 2);
        let release = summary
            .selections
            .iter()
            .find(|s| s.doc_type == DocumentType::EarningsRelease)
            .unwrap();
        assert_eq!(release.url, "https://ir.acme.example.com/files/acme-q3-2025-earnings-release.pdf");

        let discovery: IrDiscoveryRecord = read_json(store.as_ref(), "ACME/ir_discovery.json").unwrap().unwrap();
        assert_eq!(discovery.ir_url, "https://ir.acme.example.com/");
        let extracted: ExtractedReportsRecord = read_json(store.as_ref(), "ACME/extracted_reports.json").unwrap().unwrap();
        assert_eq!(extracted.reports.len(), 4);
        assert!(store.exists("ACME/selections.json").unwrap());
        assert_eq!(store.list("ACME/documents").unwrap().len(), 2);

        // A second run reuses stored documents through the URL index
        let release_url = "https://ir.acme.example.com/files/acme-q3-2025-earnings-release.pdf";
        let rerun = pipeline.run(&registry).await;
        assert_eq!(rerun.per_company_status["ACME"], CompanyStatus::Complete);
        assert_eq!(retriever.calls_for(release_url), 1);
        assert!(rerun.companies[0].selections.iter().all(|s| s.reused));
        assert_eq!(store.list("ACME/documents").unwrap().len(), 2);

        report.persist(store.as_ref()).unwrap();
        assert_eq!(store.list("run_reports").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_isolated_to_one_company() {
        let tickers = ["AAPL", "MSFT", "NVDA"];
        let store = Arc::new(MemoryBlobStore::failing_under("MSFT/documents"));
        let pipeline = Pipeline::new(Arc::new(scripted(&tickers)), store.clone(), Arc::new(HtmlConverter), config());

        let report = pipeline.run(&registry(&tickers)).await;
        assert_eq!(report.companies_processed, 3);
        assert_eq!(report.per_company_status["AAPL"], CompanyStatus::Complete);
        assert_eq!(report.per_company_status["NVDA"], CompanyStatus::Complete);
        assert_eq!(report.per_company_status["MSFT"], CompanyStatus::FetchFailed);

        let msft = report.companies.iter().find(|c| c.ticker == "MSFT").unwrap();
        assert!(msft.fetch_failures.iter().all(|f| f.kind == "storage"));
        for ticker in ["AAPL", "NVDA"] {
            let company = report.companies.iter().find(|c| c.ticker == ticker).unwrap();
            for selection in &company.selections {
                let key = selection.storage_key.as_deref().unwrap();
                assert!(store.exists(key).unwrap(), "{key}");
            }
        }
    }

    #[tokio::test]
    async fn test_discovery_failure_marks_company_empty() {
        let store = Arc::new(MemoryBlobStore::default());
        let retriever = scripted(&["AAPL"]).status("https://ir.tsla.example.com/", 500);
        let pipeline = Pipeline::new(Arc::new(retriever), store, Arc::new(HtmlConverter), config());

        let report = pipeline.run(&registry(&["AAPL", "TSLA"])).await;
        assert_eq!(report.per_company_status["AAPL"], CompanyStatus::Complete);
        assert_eq!(report.per_company_status["TSLA"], CompanyStatus::Empty);
        let tsla = report.companies.iter().find(|c| c.ticker == "TSLA").unwrap();
        assert!(tsla.notes[0].contains("No usable discovery seed"));
    }

    #[tokio::test]
    async fn test_identical_bytes_under_two_types_both_resolve() {
        let base = "https://ir.acme.example.com";
        let retriever = ScriptedRetriever::new()
            .page(
                &format!("{base}/"),
                "text/html",
                r#"<ul>
                  <li>October 30, 2025 <a href="/files/q3-2025-earnings-release.pdf">Q3 2025 Earnings Release</a></li>
                  <li>October 30, 2025 <a href="/files/q3-2025-supplemental-tables.pdf">Q3 2025 Supplemental Tables</a></li>
                </ul>"#,
            )
            .bytes(&format!("{base}/files/q3-2025-earnings-release.pdf"), "application/pdf", b"%PDF same")
            .bytes(&format!("{base}/files/q3-2025-supplemental-tables.pdf"), "application/pdf", b"%PDF same");
        let store = Arc::new(MemoryBlobStore::default());
        let config = PipelineConfig {
            expected_types: vec![DocumentType::EarningsRelease, DocumentType::SupplementalTable],
            ..config()
        };
        let pipeline = Pipeline::new(Arc::new(retriever), store.clone(), Arc::new(HtmlConverter), config);

        let report = pipeline.run(&registry(&["ACME"])).await;
        assert_eq!(report.per_company_status["ACME"], CompanyStatus::Complete, "{:?}", report.companies[0].notes);
        assert_eq!(report.fetch_successes, 2);
        let summary = &report.companies[0];
        let tables = summary
            .selections
            .iter()
            .find(|s| s.doc_type == DocumentType::SupplementalTable)
            .unwrap();
        let release = summary
            .selections
            .iter()
            .find(|s| s.doc_type == DocumentType::EarningsRelease)
            .unwrap();
        assert!(tables.content_hash.is_some());
        assert_eq!(tables.content_hash, release.content_hash);
        assert_eq!(store.list("ACME/documents").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_seed_is_counted_when_another_succeeds() {
        let raw = serde_json::json!([{
            "ticker": "ACME",
            "name": "ACME Corp",
            "seeds": [
                {"ir_url": "https://old.acme.example.com/ir"},
                {"ir_url": "https://ir.acme.example.com/"},
            ],
        }]);
        let registry = SourceRegistry::from_json_str(&raw.to_string()).unwrap();
        let retriever = scripted(&["ACME"]).status("https://old.acme.example.com/ir", 500);
        let pipeline = Pipeline::new(
            Arc::new(retriever),
            Arc::new(MemoryBlobStore::default()),
            Arc::new(HtmlConverter),
            config(),
        );

        let report = pipeline.run(&registry).await;
        assert_eq!(report.per_company_status["ACME"], CompanyStatus::Complete);
        assert_eq!(report.discovery_failures, 1);
        let summary = &report.companies[0];
        assert_eq!(summary.discovery_failures, 1);
        assert!(summary.notes.iter().any(|n| n.starts_with("discovery: seed 1")), "{:?}", summary.notes);
    }

    /// Never answers for one host; everything else goes to the script.
    struct StallingRetriever {
        inner: ScriptedRetriever,
        stalled_host: &'static str,
    }

    #[async_trait]
    impl PageRetriever for StallingRetriever {
        async fn retrieve(&self, url: &str, policy: RenderPolicy) -> Result<RawPage, RetrievalError> {
            if url.contains(self.stalled_host) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.inner.retrieve(url, policy).await
        }
    }

    #[tokio::test]
    async fn test_run_timeout_abandons_unfinished_companies() {
        let retriever = StallingRetriever {
            inner: scripted(&["AAPL", "SLOW"]),
            stalled_host: "ir.slow.example.com",
        };
        let store = Arc::new(MemoryBlobStore::default());
        let config = PipelineConfig {
            run_timeout: Some(Duration::from_millis(300)),
            ..config()
        };
        let pipeline = Pipeline::new(Arc::new(retriever), store, Arc::new(HtmlConverter), config);

        let report = pipeline.run(&registry(&["AAPL", "SLOW"])).await;
        assert_eq!(report.companies_processed, 2);
        assert_eq!(report.per_company_status["AAPL"], CompanyStatus::Complete);
        assert_eq!(report.per_company_status["SLOW"], CompanyStatus::Abandoned);
        assert_eq!(report.count(CompanyStatus::Abandoned), 1);
    }

    struct SilentInference;

    #[async_trait]
    impl InferenceCapability for SilentInference {
        async fn infer(&self, _text: &str, _schema: &ExtractionSchema) -> Result<Vec<InferredReport>, InferenceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_empty_inference_answers_keep_heuristic_selection() {
        let store = Arc::new(MemoryBlobStore::default());
        let pipeline = Pipeline::new(Arc::new(scripted(&["ACME"])), store, Arc::new(HtmlConverter), config())
            .with_inference(Arc::new(SilentInference));

        let report = pipeline.run(&registry(&["ACME"])).await;
        assert_eq!(report.per_company_status["ACME"], CompanyStatus::Complete);
        assert_eq!(report.selections_made, 2);
    }
}
