// src/fetch/mod.rs
pub mod coordinator;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extractors::candidate::DocumentType;

pub use coordinator::FetchCoordinator;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// A stored document, addressed by the SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub ticker: String,
    pub doc_type: DocumentType,
    /// URL of the selected candidate this document was fetched for.
    pub source_url: String,
    pub content_hash: String,
    pub media_type: Option<String>,
    pub size: u64,
    pub storage_key: String,
    pub fetched_at: DateTime<Utc>,
    /// True when served from storage without downloading in this run.
    #[serde(skip)]
    pub reused: bool,
}

/// URL index entry: normalized URL to content hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct UrlIndexEntry {
    pub url: String,
    pub content_hash: String,
}
