use clap::Parser;
use sitescout::config::Config;
use sitescout::Crawler;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

/// SiteScout: an intent-driven web crawler.
///
/// Give it a starting URL and a description of what you want to find; it
/// discovers and prioritises pages, extracts their content, scores their
/// relevance, and writes a structured corpus plus a summary report.
#[derive(Parser, Debug)]
#[command(name = "sitescout", version, about = "Intent-driven web crawler")]
struct Cli {
    /// Starting URL for the crawl
    #[arg(long)]
    url: String,

    /// What you want to find, in plain language
    #[arg(long, conflicts_with = "intent_file")]
    intent: Option<String>,

    /// Read the intent text from a file instead
    #[arg(long, conflicts_with = "intent")]
    intent_file: Option<PathBuf>,

    /// Maximum pages to process
    #[arg(long, default_value_t = 50)]
    max_pages: u32,

    /// Maximum link depth from the seeds
    #[arg(long, default_value_t = 3)]
    max_depth: u32,

    /// Base delay between requests, in seconds
    #[arg(long, default_value_t = 1.5)]
    delay: f64,

    /// Probability of popping a random top frontier entry instead of the best
    #[arg(long, default_value_t = 0.2)]
    exploration_rate: f64,

    /// Output directory for all artifacts
    #[arg(long, default_value = "./output")]
    output: PathBuf,

    /// Use the plain HTTP fetcher even when a browser engine is available
    #[arg(long)]
    no_selenium: bool,

    /// Run the browser engine headless (default)
    #[arg(long, overrides_with = "no_headless")]
    headless: bool,

    /// Run the browser engine with a visible window
    #[arg(long)]
    no_headless: bool,

    /// Skip report generation
    #[arg(long)]
    no_report: bool,

    /// Verbose debug logging
    #[arg(long)]
    debug: bool,

    /// Model for the fast tier (quick gate, file naming)
    #[arg(long)]
    small_model: Option<String>,

    /// Model for the intent and analysis tiers
    #[arg(long)]
    large_model: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("sitescout=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sitescout=info,warn"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("Configuration error: {message}");
            return ExitCode::FAILURE;
        }
    };

    let crawler = match Crawler::with_defaults(config) {
        Ok(crawler) => crawler,
        Err(error) => {
            eprintln!("Configuration error: {error}");
            return ExitCode::FAILURE;
        }
    };

    // A single Ctrl-C breaks the loop; the report still renders
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing up");
            signal_token.cancel();
        }
    });

    match crawler.run(cancel).await {
        Ok(report) => {
            tracing::info!(
                pages = report.stats.pages_processed,
                avg_relevance = format!("{:.2}", report.average_relevance()),
                "Done"
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("Crawl setup failed: {error}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> Result<Config, String> {
    let intent = match (&cli.intent, &cli.intent_file) {
        (Some(text), None) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read intent file {}: {e}", path.display()))?
            .trim()
            .to_string(),
        (None, None) => return Err("one of --intent or --intent-file is required".to_string()),
        (Some(_), Some(_)) => unreachable!("clap enforces the conflict"),
    };

    let mut config = Config::new(cli.url.clone(), intent);
    config.output_dir = cli.output.clone();
    config.generate_report = !cli.no_report;
    config.crawl.max_pages = cli.max_pages;
    config.crawl.max_depth = cli.max_depth;
    config.crawl.request_delay_s = cli.delay;
    config.crawl.exploration_rate = cli.exploration_rate;
    config.fetch.use_browser = !cli.no_selenium;
    config.fetch.headless = !cli.no_headless || cli.headless;
    if let Some(model) = &cli.small_model {
        config.llm.fast_model = model.clone();
    }
    if let Some(model) = &cli.large_model {
        config.llm.intent_model = model.clone();
        config.llm.analysis_model = model.clone();
    }

    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}
