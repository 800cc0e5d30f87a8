pub mod providers;

pub use providers::{
    BingProvider, DuckDuckGoApiProvider, DuckDuckGoHtmlProvider, GoogleProvider, SearchError,
    SearchHit, SearchProvider,
};

use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use crate::config::SearchOptions;
use crate::crawler::url::{normalize, url_key};
use crate::models::{IntentContext, SeedSource, SeedUrl};

/// Fallback order tried after the primary provider.
const FALLBACK_ORDER: [SeedSource; 4] = [
    SeedSource::DuckduckgoApi,
    SeedSource::Bing,
    SeedSource::DuckduckgoHtml,
    SeedSource::Google,
];

/// Per-rank decay of the synthetic relevance score.
const API_RANK_DECAY: f64 = 0.08;
const HTML_RANK_DECAY: f64 = 0.10;

/// Turns a compiled intent into the frontier's starting URLs using
/// pluggable search providers with fallback between them.
pub struct SeedGenerator {
    providers: Vec<Arc<dyn SearchProvider>>,
    options: SearchOptions,
}

impl SeedGenerator {
    pub fn new(providers: Vec<Arc<dyn SearchProvider>>, options: SearchOptions) -> Self {
        SeedGenerator { providers, options }
    }

    /// Generate seed URLs. The original start URL always comes first when
    /// `include_original` is set, regardless of provider output.
    pub async fn generate(
        &self,
        intent: &IntentContext,
        start_url: &str,
        include_original: bool,
        use_site_filter: bool,
    ) -> Vec<SeedUrl> {
        let mut seeds: Vec<SeedUrl> = Vec::new();
        let mut seen_keys: HashSet<String> = HashSet::new();

        if include_original {
            if let Some(normalized) = normalize(start_url, None) {
                seen_keys.insert(url_key(&normalized));
            }
            seeds.push(SeedUrl {
                url: start_url.to_string(),
                title: String::new(),
                snippet: String::new(),
                source: SeedSource::Original,
                rank: 0,
                relevance_score: 1.0,
            });
        }

        let query = build_query(intent, start_url, use_site_filter && self.options.use_site_filter);
        tracing::info!(%query, "Searching for seed URLs");

        let (source, hits) = self.search_with_fallback(&query).await;
        if hits.is_empty() {
            tracing::warn!("All search providers returned nothing; crawling from the start URL only");
            return seeds;
        }
        tracing::info!(provider = source.as_str(), results = hits.len(), "Seed search complete");

        let mut found: Vec<SeedUrl> = Vec::new();
        for hit in hits {
            let Some(normalized) = normalize(&hit.url, None) else {
                continue;
            };
            if !seen_keys.insert(url_key(&normalized)) {
                continue;
            }
            found.push(SeedUrl {
                url: normalized.to_string(),
                title: hit.title,
                snippet: hit.snippet,
                source,
                rank: hit.rank,
                relevance_score: synthetic_score(source, hit.rank),
            });
        }

        // Original first, then provider priority and result rank
        found.sort_by_key(|s| (s.source.priority(), s.rank));
        seeds.extend(found);
        seeds
    }

    /// Try the primary provider, then the fixed fallback chain, skipping
    /// the primary. The first provider returning any results wins.
    async fn search_with_fallback(&self, query: &str) -> (SeedSource, Vec<SearchHit>) {
        let primary = parse_provider_name(&self.options.primary_provider)
            .unwrap_or(SeedSource::DuckduckgoApi);

        let mut order: Vec<SeedSource> = vec![primary];
        order.extend(FALLBACK_ORDER.iter().filter(|s| **s != primary));

        for source in order {
            let Some(provider) = self.providers.iter().find(|p| p.source() == source) else {
                continue;
            };
            match provider.search(query).await {
                Ok(hits) if !hits.is_empty() => return (source, hits),
                Ok(_) => {
                    tracing::debug!(provider = source.as_str(), "Provider returned no results");
                }
                Err(error) => {
                    tracing::warn!(provider = source.as_str(), %error, "Provider failed");
                }
            }
        }
        (primary, Vec::new())
    }
}

/// OR-combine keywords (quoting multi-word ones) and optionally restrict
/// to the start URL's host.
pub fn build_query(intent: &IntentContext, start_url: &str, use_site_filter: bool) -> String {
    let terms: Vec<String> = intent
        .keywords
        .iter()
        .filter(|k| !k.is_empty())
        .map(|k| {
            if k.contains(' ') {
                format!("\"{k}\"")
            } else {
                k.clone()
            }
        })
        .collect();

    let mut query = terms.join(" OR ");
    if query.is_empty() {
        query = intent.search_focus.clone();
    }

    if use_site_filter {
        if let Some(host) = Url::parse(start_url).ok().and_then(|u| u.host_str().map(String::from)) {
            query.push_str(&format!(" site:{host}"));
        }
    }
    query
}

/// Synthetic relevance: API results decay slower than scraped HTML ones.
fn synthetic_score(source: SeedSource, rank: u32) -> f64 {
    let decay = match source {
        SeedSource::DuckduckgoApi => API_RANK_DECAY,
        _ => HTML_RANK_DECAY,
    };
    (1.0 - decay * (rank.max(1) - 1) as f64).clamp(0.0, 1.0)
}

fn parse_provider_name(name: &str) -> Option<SeedSource> {
    match name.trim().to_lowercase().as_str() {
        "duckduckgo_api" => Some(SeedSource::DuckduckgoApi),
        "bing" => Some(SeedSource::Bing),
        "duckduckgo_html" => Some(SeedSource::DuckduckgoHtml),
        "google" => Some(SeedSource::Google),
        _ => None,
    }
}
