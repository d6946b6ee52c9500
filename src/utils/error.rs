// src/utils/error.rs
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode), // e.g. 500 Internal Server Error, 400 Bad Request

    #[error("Rate limit likely exceeded ({0})")]
    RateLimited(reqwest::StatusCode), // 403 / 429, retried with backoff

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Unexpected content type '{content_type}' for {url}")]
    ContentType { url: String, content_type: String },

    #[error("Empty response body from {0}")]
    EmptyBody(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl RetrievalError {
    /// Whether the failure is worth another attempt (timeouts, throttling, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            RetrievalError::Network(e) => !e.is_builder() && !e.is_redirect() && !e.is_decode(),
            RetrievalError::Http(status) => status.is_server_error(),
            RetrievalError::RateLimited(_) => true,
            RetrievalError::NotFound(_)
            | RetrievalError::ContentType { .. }
            | RetrievalError::EmptyBody(_)
            | RetrievalError::InvalidUrl(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unrecognized content format: {0}")]
    UnrecognizedFormat(String),

    #[error("Malformed JSON feed: {0}")]
    MalformedFeed(String),
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Inference endpoint returned HTTP {0}")]
    Http(reqwest::StatusCode),

    #[error("Inference answer is not valid structured output: {0}")]
    MalformedAnswer(String),
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Unsupported media type: {0}")]
    Unsupported(String),

    #[error("Document could not be parsed: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Could not read registry: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse registry: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Registry contains no companies")]
    Empty,

    #[error("Duplicate ticker in registry: {0}")]
    DuplicateTicker(String),

    #[error("Invalid entry for {ticker}: {reason}")]
    InvalidEntry { ticker: String, reason: String },

    #[error("No registry companies match the filter: {0}")]
    NoMatchingCompanies(String),
}

/// Every seed of a company failed to produce a usable page.
#[derive(Error, Debug)]
#[error("No usable discovery seed for {ticker}: {}", .reasons.join("; "))]
pub struct DiscoveryFailure {
    pub ticker: String,
    pub reasons: Vec<String>,
}

#[derive(Error, Debug)]
pub enum FetchFailure {
    #[error("Transient failure after {attempts} attempt(s): {source}")]
    Transient {
        attempts: u32,
        #[source]
        source: RetrievalError,
    },

    #[error("Permanent failure: {0}")]
    Permanent(#[source] RetrievalError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl FetchFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchFailure::Transient { .. } => "transient",
            FetchFailure::Permanent(_) => "permanent",
            FetchFailure::Storage(_) => "storage",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("Source registry failed to load: {0}")]
    Registry(#[from] RegistryError),

    #[error("HTTP client setup failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
