// src/navigator/mod.rs
pub mod client;
pub mod links;

use std::collections::HashSet;

pub use client::{HttpRetriever, PageRetriever, RawPage, RenderPolicy};
use links::LinkScope;

use crate::registry::{Company, DiscoverySeed};
use crate::utils::error::DiscoveryFailure;
use crate::utils::urls::normalize_url;

#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    /// Navigational links followed from each seed page.
    pub max_promising_links: usize,
    pub render_policy: RenderPolicy,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            max_promising_links: 5,
            render_policy: RenderPolicy::WaitForScripts { millis: 10_000 },
        }
    }
}

/// Pages gathered for one company.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// The first seed page that was retrieved successfully.
    pub ir_url: String,
    pub pages: Vec<RawPage>,
    /// Seeds or followed links that could not be retrieved (recoverable).
    pub failures: Vec<String>,
}

/// Walks a company's seeds one level deep and returns every page it could retrieve.
pub struct PageNavigator<'a> {
    retriever: &'a dyn PageRetriever,
    config: NavigatorConfig,
}

impl<'a> PageNavigator<'a> {
    pub fn new(retriever: &'a dyn PageRetriever, config: NavigatorConfig) -> Self {
        Self { retriever, config }
    }

    pub async fn discover(&self, company: &Company) -> Result<Discovery, DiscoveryFailure> {
        let mut walk = Walk::default();
        let mut ir_url = None;

        for (idx, seed) in company.seeds.iter().enumerate() {
            let Some(seed_url) = seed.resolve(company) else {
                walk.failures.push(format!("seed {}: unusable seed {:?}", idx + 1, seed));
                continue;
            };
            if !walk.visited.insert(normalize_url(&seed_url)) {
                continue;
            }

            let page = match self.retriever.retrieve(&seed_url, self.config.render_policy).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(ticker = %company.ticker, url = %seed_url, "Seed retrieval failed: {}", e);
                    walk.failures.push(format!("seed {}: {}", idx + 1, e));
                    continue;
                }
            };
            tracing::info!(ticker = %company.ticker, url = %seed_url, "Retrieved seed page ({} bytes)", page.body.len());

            // A search seed lands on the first result that can be retrieved
            let landing = match seed {
                DiscoverySeed::IrUrl(_) => page,
                DiscoverySeed::SearchQuery(_) => match self.first_search_result(company, &page, &mut walk).await {
                    Some(result) => result,
                    None => {
                        walk.failures.push(format!("seed {}: no search result could be retrieved", idx + 1));
                        continue;
                    }
                },
            };
            ir_url.get_or_insert_with(|| landing.final_url.clone());
            self.explore(company, landing, &mut walk).await;
        }

        match ir_url {
            Some(ir_url) => Ok(Discovery {
                ir_url,
                pages: walk.pages,
                failures: walk.failures,
            }),
            None => Err(DiscoveryFailure {
                ticker: company.ticker.clone(),
                reasons: walk.failures,
            }),
        }
    }

    /// Keeps a landing page and follows its promising internal links.
    async fn explore(&self, company: &Company, page: RawPage, walk: &mut Walk) {
        if normalize_url(&page.url) != normalize_url(&page.final_url) {
            tracing::debug!(ticker = %company.ticker, from = %page.url, to = %page.final_url, "Followed redirect");
        }
        walk.visited.insert(normalize_url(&page.final_url));

        let promising = links::find_promising_links(
            &page.text(),
            &page.final_url,
            self.config.max_promising_links,
            &walk.visited,
            LinkScope::Internal,
        );
        walk.pages.push(page);

        for link in promising {
            if !walk.visited.insert(normalize_url(&link.url)) {
                continue;
            }
            tracing::debug!(ticker = %company.ticker, url = %link.url, score = link.score, "Following promising link");
            match self.retriever.retrieve(&link.url, self.config.render_policy).await {
                Ok(page) => {
                    walk.visited.insert(normalize_url(&page.final_url));
                    walk.pages.push(page);
                }
                Err(e) => {
                    tracing::debug!(ticker = %company.ticker, url = %link.url, "Promising link failed: {}", e);
                    walk.failures.push(format!("{}: {}", link.url, e));
                }
            }
        }
    }

    async fn first_search_result(&self, company: &Company, results: &RawPage, walk: &mut Walk) -> Option<RawPage> {
        let candidates = links::find_promising_links(
            &results.text(),
            &results.final_url,
            self.config.max_promising_links,
            &walk.visited,
            LinkScope::SearchResults,
        );
        for link in candidates {
            if !walk.visited.insert(normalize_url(&link.url)) {
                continue;
            }
            match self.retriever.retrieve(&link.url, self.config.render_policy).await {
                Ok(page) => {
                    tracing::info!(ticker = %company.ticker, url = %page.final_url, "Search resolved IR page");
                    return Some(page);
                }
                Err(e) => {
                    tracing::debug!(ticker = %company.ticker, url = %link.url, "Search result failed: {}", e);
                    walk.failures.push(format!("{}: {}", link.url, e));
                }
            }
        }
        None
    }
}

/// State of one company's discovery walk.
#[derive(Default)]
struct Walk {
    visited: HashSet<String>,
    pages: Vec<RawPage>,
    failures: Vec<String>,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted retriever shared by the pipeline tests.
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use reqwest::StatusCode;

    use super::*;
    use crate::utils::error::RetrievalError;

    #[derive(Clone)]
    pub enum Scripted {
        Page { content_type: &'static str, body: Vec<u8> },
        Status(u16),
    }

    /// Answers from a fixed table; each URL may hold a queue of answers, the last one repeats.
    #[derive(Default)]
    pub struct ScriptedRetriever {
        routes: Mutex<HashMap<String, Vec<Scripted>>>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<String>>,
    }

    impl ScriptedRetriever {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(self, url: &str, content_type: &'static str, body: &str) -> Self {
            self.push(url, Scripted::Page { content_type, body: body.as_bytes().to_vec() })
        }

        pub fn bytes(self, url: &str, content_type: &'static str, body: &[u8]) -> Self {
            self.push(url, Scripted::Page { content_type, body: body.to_vec() })
        }

        pub fn status(self, url: &str, status: u16) -> Self {
            self.push(url, Scripted::Status(status))
        }

        fn push(self, url: &str, answer: Scripted) -> Self {
            self.routes
                .lock()
                .unwrap()
                .entry(normalize_url(url))
                .or_default()
                .push(answer);
            self
        }

        pub fn calls_for(&self, url: &str) -> usize {
            let wanted = normalize_url(url);
            self.seen.lock().unwrap().iter().filter(|u| **u == wanted).count()
        }
    }

    #[async_trait]
    impl PageRetriever for ScriptedRetriever {
        async fn retrieve(&self, url: &str, _policy: RenderPolicy) -> Result<RawPage, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let key = normalize_url(url);
            self.seen.lock().unwrap().push(key.clone());
            let answer = {
                let mut routes = self.routes.lock().unwrap();
                match routes.get_mut(&key) {
                    Some(queue) if queue.len() > 1 => queue.remove(0),
                    Some(queue) if !queue.is_empty() => queue[0].clone(),
                    _ => Scripted::Status(404),
                }
            };
            match answer {
                Scripted::Page { content_type, body } => Ok(RawPage {
                    url: url.to_string(),
                    final_url: url.to_string(),
                    content_type: Some(content_type.to_string()),
                    body,
                    retrieved_at: Utc::now(),
                }),
                Scripted::Status(code) => {
                    let status = StatusCode::from_u16(code).unwrap();
                    Err(match status {
                        StatusCode::NOT_FOUND => RetrievalError::NotFound(url.to_string()),
                        StatusCode::TOO_MANY_REQUESTS => RetrievalError::RateLimited(status),
                        _ => RetrievalError::Http(status),
                    })
                }
            }
        }
    }
}
