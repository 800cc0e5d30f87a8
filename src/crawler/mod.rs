pub mod analyzer;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod pipeline;
pub mod url;

pub use analyzer::ContentAnalyzer;
pub use extractor::{ContentExtractor, PageExtractor};
pub use fetcher::{HtmlFetcher, HttpFetcher};
pub use frontier::{Frontier, FrontierItem};
pub use pipeline::PagePipeline;

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::intent::IntentCompiler;
use crate::llm::{LlmClient, LlmError, OllamaClient};
use crate::models::{CrawlStats, LinkType, PageResult, Priority, SeedUrl};
use crate::report::CrawlReport;
use crate::search::{SearchError, SearchProvider, SeedGenerator};
use crate::storage::{ContentStore, LlmNamer, ReportFormat, StorageError};
use self::url::UrlFilter;

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Fetcher setup failed: {0}")]
    Fetcher(#[from] fetcher::FetchError),
    #[error("LLM setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Search setup failed: {0}")]
    Search(#[from] SearchError),
}

/// The orchestrator: compile intent → seed → loop the pipeline → report.
///
/// Processes one URL at a time; the only shared mutable state is the
/// frontier and the store, both owned here and never reached from
/// elsewhere.
pub struct Crawler {
    config: Config,
    compiler: IntentCompiler,
    seeder: SeedGenerator,
    pipeline: PagePipeline,
    frontier: Frontier,
    store: ContentStore,
    filter: UrlFilter,
}

impl Crawler {
    /// Wire the crawler from explicit capabilities. Capabilities are
    /// plugged at construction; the core never instantiates them itself.
    pub fn new(
        config: Config,
        llm: Arc<dyn LlmClient>,
        fetcher: Arc<dyn HtmlFetcher>,
        extractor: Arc<dyn ContentExtractor>,
        providers: Vec<Arc<dyn SearchProvider>>,
    ) -> Result<Self, CrawlError> {
        config.validate()?;

        let filter = UrlFilter::new(
            config.crawl.allowed_domains.clone(),
            config.crawl.exclude_patterns.clone(),
        );
        let frontier = Frontier::new(
            filter.clone(),
            config.crawl.max_depth,
            config.crawl.depth_penalty,
            config.crawl.exploration_rate,
            config.crawl.max_retries,
        );
        let store = ContentStore::new(&config.output_dir)?
            .with_namer(Arc::new(LlmNamer::new(llm.clone())));

        let pipeline = PagePipeline::new(
            fetcher,
            extractor,
            ContentAnalyzer::new(llm.clone()),
            config.crawl.clone(),
        );

        Ok(Crawler {
            compiler: IntentCompiler::new(llm),
            seeder: SeedGenerator::new(providers, config.search.clone()),
            pipeline,
            frontier,
            store,
            filter,
            config,
        })
    }

    /// Wire the crawler with the built-in capability set: the Ollama
    /// client, the rate-limited HTTP fetcher, the scraper extractor, and
    /// all four search providers.
    pub fn with_defaults(config: Config) -> Result<Self, CrawlError> {
        let llm: Arc<dyn LlmClient> = Arc::new(OllamaClient::new(config.llm.clone())?);
        let fetcher: Arc<dyn HtmlFetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);
        let extractor: Arc<dyn ContentExtractor> = Arc::new(PageExtractor::new());
        let max = config.search.max_results;
        let timeout = config.fetch.timeout_s;
        let providers: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(crate::search::DuckDuckGoApiProvider::new(max, timeout)?),
            Arc::new(crate::search::BingProvider::new(max, timeout)?),
            Arc::new(crate::search::DuckDuckGoHtmlProvider::new(max, timeout)?),
            Arc::new(crate::search::GoogleProvider::new(max, timeout)?),
        ];
        Crawler::new(config, llm, fetcher, extractor, providers)
    }

    /// Run to completion or cancellation. The report is built regardless
    /// of how the loop ends.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<CrawlReport, CrawlError> {
        let started = Instant::now();
        let deadline = started + Duration::from_secs(self.config.crawl.run_timeout_s);

        self.store.save_state(
            "run_metadata",
            &serde_json::json!({
                "start_url": self.config.start_url,
                "intent": self.config.intent,
                "started_at": chrono::Utc::now(),
                "config": &self.config,
            }),
        )?;

        // Intent compilation never aborts the run
        let compiled = self
            .compiler
            .compile(&self.config.intent, &self.config.start_url)
            .await;
        if let Some(reason) = compiled.fallback_reason() {
            tracing::warn!(reason, "Using rule-based intent context");
        }
        let intent = compiled.into_value();
        tracing::info!(
            category = %intent.category,
            keywords = ?intent.keywords,
            "Intent compiled"
        );
        self.store.save_state("intent_analysis", &intent)?;

        // Seeding; an empty search result leaves the start URL alone
        let seeds = self
            .seeder
            .generate(&intent, &self.config.start_url, true, true)
            .await;
        self.store.save_state("seed_urls", &seeds)?;
        self.enqueue_seeds(&seeds);
        tracing::info!(seeds = seeds.len(), frontier = self.frontier.len(), "Frontier seeded");

        // Main loop
        let mut results: Vec<PageResult> = Vec::new();
        let mut pages_processed: u32 = 0;
        let mut pages_failed: u32 = 0;
        let mut cancelled = false;

        while pages_processed < self.config.crawl.max_pages {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!("Run timeout reached, stopping");
                break;
            }
            let Some(item) = self.frontier.pop() else {
                break;
            };

            // Policy may have tightened since the item was enqueued
            if let Ok(parsed) = ::url::Url::parse(&item.url) {
                if !self.filter.is_allowed(&parsed) {
                    self.frontier.mark_processed(&item.url, false);
                    continue;
                }
            }

            tracing::info!(
                url = %item.url,
                depth = item.depth,
                reason = %item.reason,
                progress = format!("{}/{}", pages_processed, self.config.crawl.max_pages),
                "Processing URL"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    self.frontier.mark_processed(&item.url, false);
                    break;
                }
                result = self.pipeline.run(&item, &intent, &mut self.store, &mut self.frontier) => result,
            };

            self.frontier.mark_processed(&item.url, result.success);
            if result.success {
                pages_processed += 1;
            } else {
                pages_failed += 1;
            }
            results.push(result);

            // Politeness delay with jitter, interruptible by cancellation
            if !self.frontier.is_empty() && pages_processed < self.config.crawl.max_pages {
                let jitter = rand::thread_rng().gen_range(0.5..=1.0);
                let delay = Duration::from_secs_f64(self.config.crawl.request_delay_s * jitter);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if cancelled {
            tracing::warn!("Crawl cancelled, flushing state");
        }

        // Final checkpoint, then the report (always)
        let checkpoint = self.store.state_path("frontier_checkpoint");
        if let Err(error) = self.frontier.save_state(&checkpoint) {
            tracing::warn!(%error, "Failed to write frontier checkpoint");
        }

        let stats = CrawlStats {
            pages_processed,
            pages_failed,
            elapsed_s: started.elapsed().as_secs_f64(),
        };
        let report = CrawlReport::build(
            &self.config.start_url,
            &self.config.intent,
            &intent,
            stats,
            self.frontier.stats(),
            self.store.stats(),
            results,
            cancelled,
        );

        if self.config.generate_report {
            let name = format!(
                "crawl_report_{}",
                report.generated_at.format("%Y%m%d_%H%M%S")
            );
            if let Err(error) =
                self.store
                    .save_report(&name, &report.render_markdown(), ReportFormat::Markdown)
            {
                tracing::error!(%error, "Failed to write markdown report");
            }
            match serde_json::to_string_pretty(&report) {
                Ok(json) => {
                    if let Err(error) = self.store.save_report(&name, &json, ReportFormat::Json) {
                        tracing::error!(%error, "Failed to write JSON report");
                    }
                }
                Err(error) => tracing::error!(%error, "Failed to serialize report"),
            }
            tracing::info!(report = %name, "Report written");
        }

        tracing::info!(
            processed = pages_processed,
            failed = pages_failed,
            elapsed_s = format!("{:.1}", report.stats.elapsed_s),
            "Crawl complete"
        );
        Ok(report)
    }

    fn enqueue_seeds(&mut self, seeds: &[SeedUrl]) {
        for seed in seeds {
            let (priority, reason) = match seed.source {
                crate::models::SeedSource::Original => (Priority::High, "seed:original".to_string()),
                other => (Priority::Medium, format!("seed:{}", other.as_str())),
            };
            let link_type = ::url::Url::parse(&seed.url)
                .map(|u| LinkType::classify(u.path()))
                .unwrap_or(LinkType::General);
            self.frontier.add(
                &seed.url,
                priority,
                0,
                None,
                seed.relevance_score,
                link_type,
                &reason,
            );
        }
    }
}
