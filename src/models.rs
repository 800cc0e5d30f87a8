use serde::{Deserialize, Serialize};
use std::fmt;

// --- Intent Context ---

/// Closed category set produced by the intent compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Content,
    Data,
    Email,
    Policy,
    Contact,
    Admission,
    Research,
    News,
    Event,
    General,
}

impl Category {
    /// Parse a category tag, rejecting anything outside the closed set.
    pub fn parse(tag: &str) -> Option<Category> {
        match tag.trim().to_lowercase().as_str() {
            "content" => Some(Category::Content),
            "data" => Some(Category::Data),
            "email" => Some(Category::Email),
            "policy" => Some(Category::Policy),
            "contact" => Some(Category::Contact),
            "admission" => Some(Category::Admission),
            "research" => Some(Category::Research),
            "news" => Some(Category::News),
            "event" => Some(Category::Event),
            "general" => Some(Category::General),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Content => "content",
            Category::Data => "data",
            Category::Email => "email",
            Category::Policy => "policy",
            Category::Contact => "contact",
            Category::Admission => "admission",
            Category::Research => "research",
            Category::News => "news",
            Category::Event => "event",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled interpretation of the operator's intent, created once per run
/// and reused by seeding, the quick gate, and every analysis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentContext {
    pub category: Category,
    pub keywords: Vec<String>,
    pub search_focus: String,
    #[serde(default)]
    pub priority_signals: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    pub analysis_background: String,
}

// --- Seed URLs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    Original,
    Google,
    Bing,
    DuckduckgoApi,
    DuckduckgoHtml,
}

impl SeedSource {
    /// Sort weight for merged seed lists. The original URL always wins.
    pub fn priority(&self) -> u8 {
        match self {
            SeedSource::Original => 0,
            SeedSource::DuckduckgoApi => 1,
            SeedSource::Bing => 2,
            SeedSource::DuckduckgoHtml => 3,
            SeedSource::Google => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeedSource::Original => "original",
            SeedSource::Google => "google",
            SeedSource::Bing => "bing",
            SeedSource::DuckduckgoApi => "duckduckgo_api",
            SeedSource::DuckduckgoHtml => "duckduckgo_html",
        }
    }
}

/// One starting URL for the frontier, produced by the seed generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUrl {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub source: SeedSource,
    pub rank: u32,
    pub relevance_score: f64,
}

// --- Frontier priorities ---

/// Base priority carried by frontier items: 1 = high, 2 = medium, 3 = low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Clamp a numeric level from an LLM response into the closed set.
    pub fn from_level(level: u8) -> Priority {
        match level {
            0 | 1 => Priority::High,
            2 => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    /// Additive bonus in the frontier ordering: high = 3, medium = 2, low = 1.
    pub fn bonus(&self) -> f64 {
        match self {
            Priority::High => 3.0,
            Priority::Medium => 2.0,
            Priority::Low => 1.0,
        }
    }
}

/// Coarse link classification by URL-path substring, feeding the frontier
/// ordering's type bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Admission,
    International,
    Financial,
    Academic,
    Research,
    Faculty,
    News,
    Navigation,
    General,
}

impl LinkType {
    pub fn bonus(&self) -> f64 {
        match self {
            LinkType::Admission => 3.0,
            LinkType::International => 2.5,
            LinkType::Financial => 2.0,
            LinkType::Academic => 1.5,
            LinkType::Research => 1.0,
            LinkType::Faculty => 0.5,
            LinkType::News => -0.5,
            LinkType::Navigation => -1.0,
            LinkType::General => 0.0,
        }
    }

    /// Classify a URL path by first matching substring pattern.
    pub fn classify(path: &str) -> LinkType {
        let path = path.to_lowercase();
        const PATTERNS: &[(&str, LinkType)] = &[
            ("admission", LinkType::Admission),
            ("apply", LinkType::Admission),
            ("enroll", LinkType::Admission),
            ("international", LinkType::International),
            ("tuition", LinkType::Financial),
            ("financial", LinkType::Financial),
            ("scholarship", LinkType::Financial),
            ("fees", LinkType::Financial),
            ("academic", LinkType::Academic),
            ("program", LinkType::Academic),
            ("degree", LinkType::Academic),
            ("course", LinkType::Academic),
            ("research", LinkType::Research),
            ("publication", LinkType::Research),
            ("faculty", LinkType::Faculty),
            ("staff", LinkType::Faculty),
            ("people", LinkType::Faculty),
            ("news", LinkType::News),
            ("press", LinkType::News),
            ("events", LinkType::News),
            ("sitemap", LinkType::Navigation),
            ("search", LinkType::Navigation),
            ("index", LinkType::Navigation),
        ];

        for (pattern, link_type) in PATTERNS {
            if path.contains(pattern) {
                return *link_type;
            }
        }
        LinkType::General
    }
}

// --- Analysis results ---

/// One outbound URL ranked by the analyser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrioritizedUrl {
    pub url: String,
    pub priority: u8,
    #[serde(default)]
    pub reason: String,
}

/// Structured output of the deep analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub relevance_score: f64,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub prioritized_urls: Vec<PrioritizedUrl>,
}

// --- Page results ---

/// Closed error taxonomy for everything the core can fail on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchFailed,
    ExtractFailed,
    LlmFailed,
    ParseFailed,
    FilterRejected,
    Duplicate,
    DepthExceeded,
    Cancelled,
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::ExtractFailed => "extract_failed",
            ErrorKind::LlmFailed => "llm_failed",
            ErrorKind::ParseFailed => "parse_failed",
            ErrorKind::FilterRejected => "filter_rejected",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::DepthExceeded => "depth_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
        }
    }
}

/// Outcome of running one URL through the page pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub title: String,
    pub fetch_time_ms: u64,
    pub analysis_time_ms: u64,
    pub relevance_score: f64,
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    pub summary: String,
    pub discovered_urls: Vec<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Set when the quick gate skipped deep analysis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl PageResult {
    /// A failed result for a stage that terminated the pipeline.
    pub fn failed(url: &str, kind: ErrorKind) -> PageResult {
        PageResult {
            url: url.to_string(),
            title: String::new(),
            fetch_time_ms: 0,
            analysis_time_ms: 0,
            relevance_score: 0.0,
            key_findings: Vec::new(),
            extracted_data: serde_json::Map::new(),
            summary: String::new(),
            discovered_urls: Vec::new(),
            success: false,
            error_kind: Some(kind),
            skip_reason: None,
        }
    }
}

// --- Run stats ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_processed: u32,
    pub pages_failed: u32,
    pub elapsed_s: f64,
}
