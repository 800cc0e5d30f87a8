pub mod config;
pub mod crawler;
pub mod intent;
pub mod llm;
pub mod models;
pub mod report;
pub mod search;
pub mod storage;

pub use config::Config;
pub use crawler::{CrawlError, Crawler};
pub use report::CrawlReport;
