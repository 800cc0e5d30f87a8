use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// URL patterns excluded from crawling by default. Login/session pages and
/// binary assets are never worth a fetch.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "/login", "/logout", "/signin", "/signup", "/cart", "/checkout", "/calendar",
];

/// Extensions of binary assets the filter always rejects.
pub const BINARY_EXTENSIONS: &[&str] = &[
    ".pdf", ".zip", ".jpg", ".jpeg", ".png", ".gif", ".mp4", ".exe", ".doc", ".docx", ".ppt",
    ".pptx", ".xls", ".xlsx", ".mp3", ".avi", ".mov", ".dmg", ".iso", ".rar", ".gz", ".tar",
];

// --- Crawl options ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlOptions {
    pub max_pages: u32,
    pub max_depth: u32,
    /// Base delay between pipeline invocations, in seconds. A uniform jitter
    /// factor in [0.5, 1.0] is applied per sleep.
    pub request_delay_s: f64,
    pub exploration_rate: f64,
    pub quick_gate_threshold: f64,
    pub depth_penalty: f64,
    pub max_retries: u32,
    pub save_raw_html: bool,
    pub run_timeout_s: u64,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        CrawlOptions {
            max_pages: 50,
            max_depth: 3,
            request_delay_s: 1.5,
            exploration_rate: 0.2,
            quick_gate_threshold: 0.2,
            depth_penalty: 0.5,
            max_retries: 0,
            save_raw_html: true,
            run_timeout_s: 3600,
            allowed_domains: Vec::new(),
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

// --- LLM options ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmOptions {
    pub host: String,
    /// Fast tier: quick gate, filename suggestions.
    pub fast_model: String,
    /// Intent tier: intent compilation.
    pub intent_model: String,
    /// Analysis tier: deep page analysis.
    pub analysis_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_s: u64,
}

impl Default for LlmOptions {
    fn default() -> Self {
        LlmOptions {
            host: "http://localhost:11434".to_string(),
            fast_model: "qwen2.5:0.5b".to_string(),
            intent_model: "qwen2.5:3b".to_string(),
            analysis_model: "qwen2.5:3b".to_string(),
            temperature: 0.1,
            max_tokens: 2048,
            timeout_s: 60,
        }
    }
}

// --- Fetch options ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    pub timeout_s: u64,
    pub user_agent: String,
    pub rate_per_second: u32,
    /// Browser-engine knobs, honoured when a browser-backed fetcher is
    /// plugged in. The built-in HTTP fetcher ignores them.
    pub use_browser: bool,
    pub headless: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            timeout_s: 30,
            user_agent: "SiteScout/0.1".to_string(),
            rate_per_second: 2,
            use_browser: true,
            headless: true,
        }
    }
}

// --- Search options ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Provider name tried first; the fallback chain covers the rest.
    pub primary_provider: String,
    pub max_results: usize,
    pub use_site_filter: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            primary_provider: "duckduckgo_api".to_string(),
            max_results: 10,
            use_site_filter: true,
        }
    }
}

// --- Aggregate ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub start_url: String,
    pub intent: String,
    pub output_dir: PathBuf,
    pub generate_report: bool,
    pub crawl: CrawlOptions,
    pub llm: LlmOptions,
    pub fetch: FetchOptions,
    pub search: SearchOptions,
}

impl Config {
    pub fn new(start_url: impl Into<String>, intent: impl Into<String>) -> Self {
        Config {
            start_url: start_url.into(),
            intent: intent.into(),
            output_dir: PathBuf::from("./output"),
            generate_report: true,
            crawl: CrawlOptions::default(),
            llm: LlmOptions::default(),
            fetch: FetchOptions::default(),
            search: SearchOptions::default(),
        }
    }

    /// Validate everything that must hold before the loop starts.
    /// Failures here are the only non-zero exit path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_url.trim().is_empty() {
            return Err(ConfigError::Missing("start URL"));
        }
        let parsed = url::Url::parse(&self.start_url)
            .map_err(|_| ConfigError::InvalidValue("url", "must be an absolute http(s) URL"))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ConfigError::InvalidValue("url", "scheme must be http or https"));
        }
        if self.intent.trim().is_empty() {
            return Err(ConfigError::Missing("intent"));
        }
        if !(0.0..=1.0).contains(&self.crawl.exploration_rate) {
            return Err(ConfigError::InvalidValue(
                "exploration-rate",
                "must be within [0, 1]",
            ));
        }
        if self.crawl.request_delay_s < 0.0 {
            return Err(ConfigError::InvalidValue("delay", "must be non-negative"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue(
                "temperature",
                "must be within [0, 2]",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, &'static str),
    #[error("Failed to read intent file: {0}")]
    IntentFile(#[from] std::io::Error),
}
