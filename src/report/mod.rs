use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;

use crate::crawler::frontier::FrontierStats;
use crate::models::{CrawlStats, IntentContext, PageResult};
use crate::storage::StoreStats;

/// Findings listed in the report's highlight section.
const MAX_TOP_FINDINGS: usize = 10;

/// Everything the run produced, in one serialisable value. The Markdown
/// rendering and the JSON artifact are two views of this struct.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub generated_at: DateTime<Utc>,
    pub start_url: String,
    pub intent: String,
    pub intent_context: IntentContext,
    pub cancelled: bool,
    pub stats: CrawlStats,
    pub frontier: FrontierStats,
    pub store: StoreStats,
    pub pages: Vec<PageResult>,
}

impl CrawlReport {
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        start_url: &str,
        intent: &str,
        intent_context: &IntentContext,
        stats: CrawlStats,
        frontier: FrontierStats,
        store: StoreStats,
        mut pages: Vec<PageResult>,
        cancelled: bool,
    ) -> Self {
        // Successful pages first, highest relevance first; failures keep
        // their processing order at the tail
        pages.sort_by(|a, b| {
            b.success
                .cmp(&a.success)
                .then(b.relevance_score.total_cmp(&a.relevance_score))
        });

        CrawlReport {
            generated_at: Utc::now(),
            start_url: start_url.to_string(),
            intent: intent.to_string(),
            intent_context: intent_context.clone(),
            cancelled,
            stats,
            frontier,
            store,
            pages,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.stats.pages_processed + self.stats.pages_failed;
        if total == 0 {
            0.0
        } else {
            self.stats.pages_processed as f64 / total as f64
        }
    }

    pub fn average_relevance(&self) -> f64 {
        let successful: Vec<&PageResult> = self.pages.iter().filter(|p| p.success).collect();
        if successful.is_empty() {
            return 0.0;
        }
        successful.iter().map(|p| p.relevance_score).sum::<f64>() / successful.len() as f64
    }

    /// Render the Markdown report. Always produces a document, even for a
    /// run that processed nothing.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# Crawl Report");
        let _ = writeln!(out);
        let _ = writeln!(out, "- **Generated**: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "- **Start URL**: {}", self.start_url);
        let _ = writeln!(out, "- **Intent**: {}", self.intent);
        let _ = writeln!(out, "- **Category**: {}", self.intent_context.category);
        let _ = writeln!(out, "- **Keywords**: {}", self.intent_context.keywords.join(", "));
        if self.cancelled {
            let _ = writeln!(out);
            let _ = writeln!(out, "> Run was interrupted; this report covers the pages processed before cancellation.");
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "## Summary");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Metric | Value |");
        let _ = writeln!(out, "|---|---|");
        let _ = writeln!(out, "| Pages processed | {} |", self.stats.pages_processed);
        let _ = writeln!(out, "| Pages failed | {} |", self.stats.pages_failed);
        let _ = writeln!(out, "| Success rate | {:.0}% |", self.success_rate() * 100.0);
        let _ = writeln!(out, "| Average relevance | {:.2} |", self.average_relevance());
        let _ = writeln!(out, "| Elapsed | {:.1}s |", self.stats.elapsed_s);
        let _ = writeln!(out, "| URLs enqueued | {} |", self.frontier.counters.total_added);
        let _ = writeln!(out, "| Duplicates skipped | {} |", self.frontier.counters.duplicates_skipped);
        let _ = writeln!(out, "| Filtered out | {} |", self.frontier.counters.filtered_out);
        let _ = writeln!(out, "| Left in frontier | {} |", self.frontier.in_frontier);
        let _ = writeln!(out, "| Domains touched | {} |", self.frontier.distinct_domains);
        let _ = writeln!(out, "| Files written | {} |", self.store.total_files);
        let _ = writeln!(out, "| Bytes written | {} |", self.store.total_bytes);
        let _ = writeln!(out, "| Duplicate payloads shared | {} |", self.store.duplicates_skipped);

        let findings: Vec<&String> = self
            .pages
            .iter()
            .filter(|p| p.success)
            .flat_map(|p| p.key_findings.iter())
            .take(MAX_TOP_FINDINGS)
            .collect();
        if !findings.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Top findings");
            let _ = writeln!(out);
            for finding in findings {
                let _ = writeln!(out, "- {finding}");
            }
        }

        let successful: Vec<&PageResult> = self.pages.iter().filter(|p| p.success).collect();
        let _ = writeln!(out);
        let _ = writeln!(out, "## Pages ({})", successful.len());
        if successful.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "No pages were successfully processed.");
        }
        for page in &successful {
            let _ = writeln!(out);
            let title = if page.title.is_empty() { &page.url } else { &page.title };
            let _ = writeln!(out, "### {title}");
            let _ = writeln!(out);
            let _ = writeln!(out, "- URL: {}", page.url);
            let _ = writeln!(out, "- Relevance: {:.2}", page.relevance_score);
            if let Some(reason) = &page.skip_reason {
                let _ = writeln!(out, "- Deep analysis skipped: {reason}");
            }
            if !page.summary.is_empty() {
                let _ = writeln!(out, "- Summary: {}", page.summary);
            }
            for finding in &page.key_findings {
                let _ = writeln!(out, "- Finding: {finding}");
            }
            if !page.discovered_urls.is_empty() {
                let _ = writeln!(out, "- Discovered {} outbound URLs", page.discovered_urls.len());
            }
        }

        let failed: Vec<&PageResult> = self.pages.iter().filter(|p| !p.success).collect();
        if !failed.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Failed ({})", failed.len());
            let _ = writeln!(out);
            let _ = writeln!(out, "| URL | Error |");
            let _ = writeln!(out, "|---|---|");
            for page in failed {
                let kind = page
                    .error_kind
                    .map(|k| k.as_str())
                    .unwrap_or("unknown");
                let _ = writeln!(out, "| {} | {} |", page.url, kind);
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::frontier::FrontierCounters;
    use crate::models::{Category, ErrorKind};

    fn intent_context() -> IntentContext {
        IntentContext {
            category: Category::Admission,
            keywords: vec!["admission".to_string()],
            search_focus: "admission".to_string(),
            priority_signals: vec![],
            exclude_patterns: vec![],
            analysis_background: String::new(),
        }
    }

    fn page(url: &str, relevance: f64, success: bool) -> PageResult {
        PageResult {
            url: url.to_string(),
            title: format!("Title {url}"),
            fetch_time_ms: 10,
            analysis_time_ms: 20,
            relevance_score: relevance,
            key_findings: vec![format!("finding from {url}")],
            extracted_data: serde_json::Map::new(),
            summary: "summary".to_string(),
            discovered_urls: vec![],
            success,
            error_kind: if success { None } else { Some(ErrorKind::FetchFailed) },
            skip_reason: None,
        }
    }

    fn report(pages: Vec<PageResult>) -> CrawlReport {
        let processed = pages.iter().filter(|p| p.success).count() as u32;
        let failed = pages.len() as u32 - processed;
        CrawlReport::build(
            "https://ex.com",
            "admission info",
            &intent_context(),
            CrawlStats {
                pages_processed: processed,
                pages_failed: failed,
                elapsed_s: 12.5,
            },
            FrontierStats {
                in_frontier: 0,
                processed: processed as usize,
                failed: failed as usize,
                distinct_domains: 1,
                counters: FrontierCounters::default(),
            },
            StoreStats::default(),
            pages,
            false,
        )
    }

    #[test]
    fn test_empty_run_still_renders() {
        let report = report(vec![]);
        let markdown = report.render_markdown();
        assert!(markdown.contains("# Crawl Report"));
        assert!(markdown.contains("| Pages processed | 0 |"));
        assert!(markdown.contains("No pages were successfully processed."));
        assert_eq!(report.success_rate(), 0.0);
    }

    #[test]
    fn test_pages_sorted_by_relevance() {
        let report = report(vec![
            page("https://ex.com/low", 0.2, true),
            page("https://ex.com/high", 0.9, true),
            page("https://ex.com/bad", 0.0, false),
        ]);
        assert_eq!(report.pages[0].url, "https://ex.com/high");
        assert_eq!(report.pages[1].url, "https://ex.com/low");
        assert!(!report.pages[2].success);
        assert!((report.average_relevance() - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_failed_section_lists_error_kind() {
        let report = report(vec![page("https://ex.com/bad", 0.0, false)]);
        let markdown = report.render_markdown();
        assert!(markdown.contains("## Failed (1)"));
        assert!(markdown.contains("| https://ex.com/bad | fetch_failed |"));
        assert!(markdown.contains("| Success rate | 0% |"));
    }

    #[test]
    fn test_json_serializes() {
        let report = report(vec![page("https://ex.com/a", 0.5, true)]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["start_url"], "https://ex.com");
        assert_eq!(json["pages"][0]["relevance_score"], 0.5);
        assert_eq!(json["intent_context"]["category"], "admission");
    }

    #[test]
    fn test_cancelled_notice() {
        let mut r = report(vec![]);
        r.cancelled = true;
        assert!(r.render_markdown().contains("interrupted"));
    }
}
