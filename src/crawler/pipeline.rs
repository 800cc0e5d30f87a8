use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use super::analyzer::{ContentAnalyzer, QUICK_PREVIEW_CHARS};
use super::extractor::ContentExtractor;
use super::fetcher::HtmlFetcher;
use super::frontier::{Frontier, FrontierItem};
use super::url::{normalize, url_key};
use crate::config::CrawlOptions;
use crate::models::{AnalysisResult, ErrorKind, IntentContext, LinkType, PageResult, Priority};
use crate::storage::ContentStore;

/// Random internal links pushed per page beyond the analyser's picks, so
/// frontier growth never collapses to the model's recommendations alone.
const EXPLORATION_LINKS: usize = 5;

/// Runs one URL through fetch → extract → quick gate → deep analysis →
/// discovery. Each stage has explicit failure semantics: fetch/extract
/// failures terminate the invocation, model failures only degrade it.
pub struct PagePipeline {
    fetcher: Arc<dyn HtmlFetcher>,
    extractor: Arc<dyn ContentExtractor>,
    analyzer: ContentAnalyzer,
    options: CrawlOptions,
}

impl PagePipeline {
    pub fn new(
        fetcher: Arc<dyn HtmlFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        analyzer: ContentAnalyzer,
        options: CrawlOptions,
    ) -> Self {
        PagePipeline {
            fetcher,
            extractor,
            analyzer,
            options,
        }
    }

    pub async fn run(
        &self,
        item: &FrontierItem,
        intent: &IntentContext,
        store: &mut ContentStore,
        frontier: &mut Frontier,
    ) -> PageResult {
        // Stage F: fetch
        let fetched = match self.fetcher.fetch(&item.url).await {
            Ok(fetched) => fetched,
            Err(error) => {
                tracing::warn!(url = %item.url, %error, "Fetch failed");
                return PageResult::failed(&item.url, ErrorKind::FetchFailed);
            }
        };

        if self.options.save_raw_html {
            if let Err(error) = store.save_raw(&item.url, "", &fetched.html).await {
                tracing::warn!(url = %item.url, %error, "Failed to persist raw HTML");
            }
        }

        // Stage E: extract
        let page_url = if fetched.final_url.is_empty() {
            item.url.clone()
        } else {
            fetched.final_url.clone()
        };
        let content = match self.extractor.extract(&fetched.html, &page_url) {
            Ok(content) if !content.text.is_empty() => content,
            Ok(_) => {
                tracing::warn!(url = %item.url, "Extractor yielded no text");
                return PageResult::failed(&item.url, ErrorKind::ExtractFailed);
            }
            Err(error) => {
                tracing::warn!(url = %item.url, %error, "Extraction failed");
                return PageResult::failed(&item.url, ErrorKind::ExtractFailed);
            }
        };

        if let Err(error) = store
            .save_processed(&item.url, &content.title, &content)
            .await
        {
            tracing::warn!(url = %item.url, %error, "Failed to persist processed content");
        }

        // Stage G: quick relevance gate
        let analysis_start = Instant::now();
        let (gate_score, _matched) = self
            .analyzer
            .quick_relevance(&content.title, content.preview(QUICK_PREVIEW_CHARS), intent)
            .await;

        let gated = gate_score < self.options.quick_gate_threshold;
        let (analysis, fallback_reason, skip_reason) = if gated {
            // The gate is advisory: deep analysis is skipped but discovery
            // still runs off the rule-based ranking.
            let skip = format!("below quick gate threshold ({gate_score:.2})");
            tracing::info!(url = %item.url, score = gate_score, "Quick gate skipped deep analysis");
            let fallback = super::analyzer::rule_based_analysis(&content, intent);
            (fallback, None, Some(skip))
        } else {
            // Stage A: deep analysis
            let parsed = self.analyzer.analyze(&content, intent).await;
            let reason = parsed.fallback_reason().map(String::from);
            (parsed.into_value(), reason, None)
        };
        let analysis_time_ms = analysis_start.elapsed().as_millis() as u64;

        self.persist_analysis(store, item, &content.title, &analysis, gate_score, gated, &fallback_reason)
            .await;

        // Stage D: discovery
        let discovered = self.discover(item, &content, &analysis, frontier);

        let relevance = if gated { gate_score } else { analysis.relevance_score };
        PageResult {
            url: item.url.clone(),
            title: content.title,
            fetch_time_ms: fetched.fetch_time_ms,
            analysis_time_ms,
            relevance_score: relevance,
            key_findings: analysis.key_findings,
            extracted_data: analysis.extracted_data,
            summary: analysis.summary,
            discovered_urls: discovered,
            success: true,
            error_kind: None,
            skip_reason,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_analysis(
        &self,
        store: &mut ContentStore,
        item: &FrontierItem,
        title: &str,
        analysis: &AnalysisResult,
        gate_score: f64,
        gated: bool,
        fallback_reason: &Option<String>,
    ) {
        let mut value = match serde_json::to_value(analysis) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        value.insert("quick_gate_score".to_string(), gate_score.into());
        if gated {
            value.insert("deep_analysis_skipped".to_string(), true.into());
        }
        if let Some(reason) = fallback_reason {
            value.insert("analysis_fallback".to_string(), reason.clone().into());
        }

        if let Err(error) = store
            .save_analysis(&item.url, title, &serde_json::Value::Object(value))
            .await
        {
            tracing::warn!(url = %item.url, %error, "Failed to persist analysis");
        }
    }

    /// Push the analyser's ranked URLs, then up to five random unvisited
    /// internal links as exploration.
    fn discover(
        &self,
        item: &FrontierItem,
        content: &super::extractor::ExtractedContent,
        analysis: &AnalysisResult,
        frontier: &mut Frontier,
    ) -> Vec<String> {
        let base = Url::parse(&item.url).ok();
        let next_depth = item.depth + 1;
        let mut discovered = Vec::new();
        let mut recommended_keys: HashSet<String> = HashSet::new();

        for ranked in &analysis.prioritized_urls {
            let Some(resolved) = normalize(&ranked.url, base.as_ref()) else {
                continue;
            };
            recommended_keys.insert(url_key(&resolved));
            if frontier.has_seen(&resolved) {
                continue;
            }
            let link_type = LinkType::classify(resolved.path());
            // Map priority 1/2/3 onto a descending score in (0, 1]
            let ai_score = (4 - ranked.priority.clamp(1, 3)) as f64 / 3.0;
            let added = frontier.add(
                resolved.as_str(),
                Priority::from_level(ranked.priority),
                next_depth,
                Some(&item.url),
                ai_score,
                link_type,
                &ranked.reason,
            );
            if added {
                discovered.push(resolved.to_string());
            }
        }

        // Exploration picks from the remaining unvisited internal links
        let mut candidates: Vec<Url> = Vec::new();
        for link in content.internal_links() {
            let Some(resolved) = normalize(&link.url, base.as_ref()) else {
                continue;
            };
            let key = url_key(&resolved);
            if recommended_keys.contains(&key) || frontier.has_seen(&resolved) {
                continue;
            }
            if !candidates.iter().any(|c| url_key(c) == key) {
                candidates.push(resolved);
            }
        }

        let picks = candidates
            .choose_multiple(&mut rand::thread_rng(), EXPLORATION_LINKS)
            .cloned()
            .collect::<Vec<_>>();
        for url in picks {
            let link_type = LinkType::classify(url.path());
            let added = frontier.add(
                url.as_str(),
                Priority::Low,
                next_depth,
                Some(&item.url),
                0.0,
                link_type,
                "exploration",
            );
            if added {
                discovered.push(url.to_string());
            }
        }

        discovered
    }
}
