// src/navigator/client.rs
use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header, StatusCode};

use crate::utils::error::RetrievalError;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT: &str = "text/html,application/xhtml+xml,application/pdf,application/json;q=0.9,*/*;q=0.8";

/// How long a retriever should let client-side scripts run before capturing content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderPolicy {
    #[default]
    Static,
    WaitForScripts { millis: u64 },
}

/// Raw content returned for one URL.
#[derive(Debug, Clone)]
pub struct RawPage {
    /// The URL that was requested.
    pub url: String,
    /// The URL after redirects; relative links resolve against it.
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub retrieved_at: DateTime<Utc>,
}

impl RawPage {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Media type without parameters, lowercased (`text/html; charset=utf-8` -> `text/html`).
    pub fn media_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
    }
}

/// The page-retrieval capability: URL in, raw content out.
#[async_trait]
pub trait PageRetriever: Send + Sync {
    async fn retrieve(&self, url: &str, policy: RenderPolicy) -> Result<RawPage, RetrievalError>;
}

/// Plain HTTP retriever. Serves static content only; script rendering is not available.
pub struct HttpRetriever {
    client: reqwest::Client,
    request_delay: Duration,
}

impl HttpRetriever {
    pub fn new(user_agent: &str, request_delay: Duration, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client, request_delay })
    }
}

#[async_trait]
impl PageRetriever for HttpRetriever {
    async fn retrieve(&self, url: &str, policy: RenderPolicy) -> Result<RawPage, RetrievalError> {
        if reqwest::Url::parse(url).is_err() {
            return Err(RetrievalError::InvalidUrl(url.to_string()));
        }
        if let RenderPolicy::WaitForScripts { millis } = policy {
            tracing::debug!("Script rendering ({} ms) requested for {} but only static content is available", millis, url);
        }

        // Politeness delay before every request
        tokio::time::sleep(self.request_delay).await;

        tracing::debug!("Retrieving {}", url);
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, ACCEPT)
            .header(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("HTTP error status: {} for URL: {}", status, url);
            return Err(match status {
                StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => RetrievalError::RateLimited(status),
                StatusCode::NOT_FOUND | StatusCode::GONE => RetrievalError::NotFound(url.to_string()),
                _ => RetrievalError::Http(status),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();
        tracing::debug!("Retrieved {} bytes from {} ({:?})", body.len(), final_url, content_type);

        Ok(RawPage {
            url: url.to_string(),
            final_url,
            content_type,
            body,
            retrieved_at: Utc::now(),
        })
    }
}
