// src/main.rs
mod convert;
mod extractors;
mod fetch;
mod navigator;
mod pipeline;
mod registry;
mod selection;
mod storage;
mod utils;
mod verify;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use convert::HtmlConverter;
use extractors::{DocumentType, HttpInference};
use fetch::RetryPolicy;
use navigator::client::DEFAULT_USER_AGENT;
use navigator::{HttpRetriever, NavigatorConfig};
use pipeline::{Pipeline, PipelineConfig};
use registry::SourceRegistry;
use selection::SelectionConfig;
use storage::FsBlobStore;
use utils::AppError;
use verify::CompanyStatus;

/// Collects the latest quarterly earnings documents for the companies in a registry
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source registry (JSON array of companies and their discovery seeds)
    #[arg(short, long, env = "EARNINGS_REGISTRY")]
    registry: String,

    /// Output directory for documents, artifacts and run reports
    #[arg(short, long, env = "EARNINGS_OUTPUT_DIR", default_value = "./output")]
    output_dir: String,

    /// Only process these tickers (comma-separated)
    #[arg(short, long, env = "EARNINGS_COMPANIES", value_delimiter = ',')]
    companies: Vec<String>,

    /// Companies processed in parallel
    #[arg(long, default_value_t = 10)]
    max_workers: usize,

    /// Runner-up candidates kept per selection
    #[arg(long, default_value_t = 5)]
    max_runner_ups: usize,

    /// Attempts per document fetch, including the first
    #[arg(long, default_value_t = 3)]
    fetch_attempts: u32,

    /// Base backoff between fetch attempts, doubled after each failure
    #[arg(long, default_value_t = 500)]
    backoff_ms: u64,

    /// Pause before every HTTP request
    #[arg(long, default_value_t = 150)]
    request_delay_ms: u64,

    /// Timeout of a single HTTP request
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// Abandon unfinished companies after this many seconds
    #[arg(long, env = "EARNINGS_RUN_TIMEOUT_SECS")]
    run_timeout_secs: Option<u64>,

    /// Navigational links followed from each seed page
    #[arg(long, default_value_t = 5)]
    max_promising_links: usize,

    /// Document types a company must resolve to count as complete
    #[arg(long, value_delimiter = ',', default_value = "earnings_release")]
    expected_types: Vec<DocumentType>,

    /// OpenAI-compatible chat-completions endpoint; heuristics only when unset
    #[arg(long, env = "INFERENCE_ENDPOINT")]
    inference_endpoint: Option<String>,

    #[arg(long, env = "INFERENCE_MODEL", default_value = "gpt-4o-mini")]
    inference_model: String,

    #[arg(long, env = "INFERENCE_API_KEY", hide_env_values = true)]
    inference_api_key: Option<String>,

    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,

    /// Debug-level logging when RUST_LOG is not set
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig, AppError> {
        if self.max_workers == 0 {
            return Err(AppError::Config("--max-workers must be at least 1".to_string()));
        }
        if self.fetch_attempts == 0 {
            return Err(AppError::Config("--fetch-attempts must be at least 1".to_string()));
        }
        Ok(PipelineConfig {
            max_workers: self.max_workers,
            navigator: NavigatorConfig {
                max_promising_links: self.max_promising_links,
                ..NavigatorConfig::default()
            },
            selection: SelectionConfig {
                max_runner_ups: self.max_runner_ups,
            },
            retry: RetryPolicy {
                max_attempts: self.fetch_attempts,
                base_delay: Duration::from_millis(self.backoff_ms),
            },
            expected_types: self.expected_types.clone(),
            run_timeout: self.run_timeout_secs.map(Duration::from_secs),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Parse CLI Arguments, then set up logging (RUST_LOG wins over --verbose)
    let args = Args::parse();
    utils::logging::setup_logging(args.verbose);
    tracing::info!("Starting run: registry={}, output={}", args.registry, args.output_dir);

    // 2. Load the source registry; nothing to do without it
    let registry = SourceRegistry::load(&args.registry)?.filter(&args.companies)?;
    let config = args.pipeline_config()?;

    // 3. Initialize storage and capabilities
    let store = Arc::new(FsBlobStore::new(&args.output_dir)?);
    let retriever = HttpRetriever::new(
        &args.user_agent,
        Duration::from_millis(args.request_delay_ms),
        Duration::from_secs(args.request_timeout_secs),
    )?;
    let mut pipeline = Pipeline::new(Arc::new(retriever), store.clone(), Arc::new(HtmlConverter), config);

    if let Some(endpoint) = &args.inference_endpoint {
        let inference = HttpInference::new(endpoint.clone(), args.inference_model.clone(), args.inference_api_key.clone())
            .map_err(|e| AppError::Config(format!("inference client: {e}")))?;
        tracing::info!("Inference enabled ({} at {})", inference.model(), endpoint);
        pipeline = pipeline.with_inference(Arc::new(inference));
    } else {
        tracing::info!("No inference endpoint configured, extraction is heuristic-only");
    }

    // 4. Run and write the report
    let report = pipeline.run(&registry).await;
    let key = report.persist(store.as_ref())?;

    tracing::info!(
        "Processing finished. Complete: {}, Partial: {}, Empty: {}, Fetch failed: {}, Abandoned: {}",
        report.count(CompanyStatus::Complete),
        report.count(CompanyStatus::Partial),
        report.count(CompanyStatus::Empty),
        report.count(CompanyStatus::FetchFailed),
        report.count(CompanyStatus::Abandoned)
    );
    tracing::info!("Run report: {}", store.base_dir().join(key).display());
    Ok(())
}
