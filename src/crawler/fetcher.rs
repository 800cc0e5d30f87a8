use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

use crate::config::FetchOptions;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP {0}")]
    HttpStatus(u16),
    #[error("Response was not HTML ({0})")]
    NotHtml(String),
}

/// Result of a successful page fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    pub final_url: String,
    pub html: String,
    pub status_code: u16,
    pub content_type: String,
    pub fetch_time_ms: u64,
}

/// Capability interface for retrieving a page. Implementations own their
/// transport concerns (redirects, retries, rendering); the pipeline sees
/// one result per call.
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError>;
}

type DomainLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP fetcher with per-domain rate limiting.
///
/// Each domain gets its own limiter so a slow host cannot starve fetches
/// from the rest of the frontier.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    limiters: Arc<Mutex<HashMap<String, Arc<DomainLimiter>>>>,
    rate_per_second: u32,
}

impl HttpFetcher {
    pub fn new(options: &FetchOptions) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&options.user_agent)
            .timeout(Duration::from_secs(options.timeout_s))
            .redirect(reqwest::redirect::Policy::limited(10))
            .gzip(true)
            .pool_max_idle_per_host(20)
            .build()
            .map_err(|e| FetchError::RequestFailed(e.to_string()))?;

        Ok(HttpFetcher {
            client,
            limiters: Arc::new(Mutex::new(HashMap::new())),
            rate_per_second: options.rate_per_second.max(1),
        })
    }

    /// Limiter for a domain, created on first contact.
    async fn limiter_for(&self, domain: &str) -> Arc<DomainLimiter> {
        let mut limiters = self.limiters.lock().await;
        if let Some(existing) = limiters.get(domain) {
            return existing.clone();
        }
        let rate = NonZeroU32::new(self.rate_per_second).expect("rate is at least 1");
        let created = Arc::new(RateLimiter::direct(Quota::per_second(rate)));
        limiters.insert(domain.to_string(), created.clone());
        created
    }
}

#[async_trait]
impl HtmlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResult, FetchError> {
        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_default();

        let limiter = self.limiter_for(&domain).await;
        limiter.until_ready().await;

        let start = Instant::now();
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::RequestFailed(e.to_string())
            }
        })?;

        let status_code = response.status().as_u16();
        if response.status().is_client_error() || response.status().is_server_error() {
            return Err(FetchError::HttpStatus(status_code));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type.is_empty()
            && !content_type.contains("html")
            && !content_type.contains("text/plain")
        {
            return Err(FetchError::NotHtml(content_type));
        }

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::RequestFailed(e.to_string())
            }
        })?;

        let fetch_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(url, status_code, ms = fetch_time_ms, bytes = html.len(), "Fetched page");

        Ok(FetchResult {
            url: url.to_string(),
            final_url,
            html,
            status_code,
            content_type,
            fetch_time_ms,
        })
    }
}
