use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::llm::{GenerateRequest, LlmClient, ModelTier};

/// Maximum length of a sanitized filename stem.
const MAX_STEM_LEN: usize = 50;

/// Capability for supplying a semantic filename stem. The store falls back
/// to the URL's last path segment when no namer is attached or the namer
/// declines.
#[async_trait]
pub trait FileNamer: Send + Sync {
    async fn suggest(&self, url: &str, title: &str) -> Option<String>;
}

/// Fast-tier LLM namer: asks for a few descriptive words and sanitizes
/// whatever comes back.
pub struct LlmNamer {
    llm: Arc<dyn LlmClient>,
}

impl LlmNamer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        LlmNamer { llm }
    }
}

#[async_trait]
impl FileNamer for LlmNamer {
    async fn suggest(&self, url: &str, title: &str) -> Option<String> {
        let request = GenerateRequest::new(
            ModelTier::Fast,
            "You produce short snake_case filenames. Respond with the filename \
             only: 2-5 lowercase words joined by underscores, no extension.",
            format!("URL: {url}\nTitle: {title}\n\nFilename:"),
        )
        .with_temperature(0.1)
        .with_max_tokens(24);

        let response = self.llm.generate(request).await.ok()?;
        let stem = sanitize(response.lines().next().unwrap_or(""));
        if stem.is_empty() {
            None
        } else {
            Some(stem)
        }
    }
}

/// Sanitize a stem: lowercase, non-alphanumeric to `_`, collapse runs,
/// trim, truncate. Applying it twice is the identity.
pub fn sanitize(stem: &str) -> String {
    let mut out = String::with_capacity(stem.len());
    let mut last_underscore = true; // trims leading underscores
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out.truncate(MAX_STEM_LEN);
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Fallback stem: the last non-empty path segment of the URL, then the
/// host, then a constant.
pub fn stem_from_url(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(segments) = parsed.path_segments() {
            if let Some(last) = segments.filter(|s| !s.is_empty()).last() {
                let stem = sanitize(last);
                if !stem.is_empty() {
                    return stem;
                }
            }
        }
        if let Some(host) = parsed.host_str() {
            let stem = sanitize(host);
            if !stem.is_empty() {
                return stem;
            }
        }
    }
    "page".to_string()
}
