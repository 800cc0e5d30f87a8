pub mod names;

pub use names::{sanitize, stem_from_url, FileNamer, LlmNamer};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::crawler::url::{normalize, url_key};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// The store's layered directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreCategory {
    Raw,
    Processed,
    Analysis,
    Reports,
    State,
    Logs,
}

impl StoreCategory {
    pub const ALL: [StoreCategory; 6] = [
        StoreCategory::Raw,
        StoreCategory::Processed,
        StoreCategory::Analysis,
        StoreCategory::Reports,
        StoreCategory::State,
        StoreCategory::Logs,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            StoreCategory::Raw => "raw",
            StoreCategory::Processed => "processed",
            StoreCategory::Analysis => "analysis",
            StoreCategory::Reports => "reports",
            StoreCategory::State => "state",
            StoreCategory::Logs => "logs",
        }
    }
}

impl fmt::Display for StoreCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Markdown,
    Html,
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Html => "html",
            ReportFormat::Json => "json",
        }
    }
}

/// Record of one artifact written during the run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub path: PathBuf,
    pub category: StoreCategory,
    pub content_hash: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_files: u64,
    pub total_bytes: u64,
    pub files_by_category: HashMap<String, u64>,
    pub bytes_by_category: HashMap<String, u64>,
    pub duplicates_skipped: u64,
}

/// Metadata envelope added to every processed/analysis artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEnvelope {
    pub url: String,
    pub saved_at: DateTime<Utc>,
    pub filename: String,
}

/// Layered, content-addressed artifact store.
///
/// Identical raw payloads share a single file on disk; the second write is
/// recorded as an alias. The raw, processed, and analysis artifacts of one
/// URL share a filename stem so a directory listing reads coherently.
pub struct ContentStore {
    base: PathBuf,
    namer: Option<Arc<dyn FileNamer>>,
    /// Content hash -> first path written with those bytes (raw dedup).
    hash_index: HashMap<String, PathBuf>,
    /// URL aliases for deduplicated raw payloads.
    aliases: HashMap<String, PathBuf>,
    /// Canonical URL key -> filename stem shared across stages.
    stems: HashMap<String, String>,
    files: Vec<StoredFile>,
    duplicates_skipped: u64,
}

impl ContentStore {
    /// Create the store and its directory layout under `base`.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base = base.into();
        for category in StoreCategory::ALL {
            std::fs::create_dir_all(base.join(category.dir_name()))?;
        }
        Ok(ContentStore {
            base,
            namer: None,
            hash_index: HashMap::new(),
            aliases: HashMap::new(),
            stems: HashMap::new(),
            files: Vec::new(),
            duplicates_skipped: 0,
        })
    }

    pub fn with_namer(mut self, namer: Arc<dyn FileNamer>) -> Self {
        self.namer = Some(namer);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn category_dir(&self, category: StoreCategory) -> PathBuf {
        self.base.join(category.dir_name())
    }

    fn key_for(url: &str) -> String {
        match normalize(url, None) {
            Some(normalized) => url_key(&normalized),
            None => format!("{:x}", md5::compute(url.as_bytes())),
        }
    }

    /// Resolve the filename stem for a URL: the namer's suggestion, else
    /// the last URL path segment, suffixed with 8 hex chars of the content
    /// hash so distinct payloads never collide on a shared base name.
    async fn resolve_stem(&mut self, url: &str, title: &str, content_hash: &str) -> String {
        let key = Self::key_for(url);
        if let Some(existing) = self.stems.get(&key) {
            return existing.clone();
        }

        let base_stem = match &self.namer {
            Some(namer) => namer
                .suggest(url, title)
                .await
                .map(|s| sanitize(&s))
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| stem_from_url(url)),
            None => stem_from_url(url),
        };
        let suffix = &content_hash[..8.min(content_hash.len())];
        let stem = format!("{base_stem}_{suffix}");
        self.stems.insert(key, stem.clone());
        stem
    }

    /// Append `_1`, `_2`, ... until the path is free.
    fn unique_path(&self, category: StoreCategory, stem: &str, extension: &str) -> PathBuf {
        let dir = self.category_dir(category);
        let candidate = dir.join(format!("{stem}.{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        let mut counter = 1u32;
        loop {
            let candidate = dir.join(format!("{stem}_{counter}.{extension}"));
            if !candidate.exists() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Write bytes atomically: temp file in the target directory, then
    /// rename over the final path.
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn record(&mut self, path: &Path, category: StoreCategory, hash: String, size: u64, url: Option<&str>) {
        self.files.push(StoredFile {
            path: path.to_path_buf(),
            category,
            content_hash: hash,
            size,
            url: url.map(|u| u.to_string()),
            created_at: Utc::now(),
        });
    }

    // --- Raw HTML ---

    /// Persist raw HTML. If a payload with the same content hash already
    /// exists, nothing is written: the existing path is returned and the
    /// URL recorded as an alias.
    pub async fn save_raw(
        &mut self,
        url: &str,
        title: &str,
        html: &str,
    ) -> Result<PathBuf, StorageError> {
        let hash = content_hash(html.as_bytes());

        if let Some(existing) = self.hash_index.get(&hash) {
            let existing = existing.clone();
            self.duplicates_skipped += 1;
            self.aliases.insert(url.to_string(), existing.clone());
            self.persist_alias_map()?;
            tracing::debug!(url, path = %existing.display(), "Duplicate raw payload, alias recorded");
            // Share the stem so later stages of this URL line up with the
            // original payload's artifacts.
            let key = Self::key_for(url);
            if let Some(stem) = existing.file_stem().and_then(|s| s.to_str()) {
                self.stems.entry(key).or_insert_with(|| stem.to_string());
            }
            return Ok(existing);
        }

        let stem = self.resolve_stem(url, title, &hash).await;
        let path = self.unique_path(StoreCategory::Raw, &stem, "html");
        Self::write_atomic(&path, html.as_bytes())?;

        self.hash_index.insert(hash.clone(), path.clone());
        self.record(&path, StoreCategory::Raw, hash, html.len() as u64, Some(url));
        Ok(path)
    }

    fn persist_alias_map(&self) -> Result<(), StorageError> {
        let path = self.category_dir(StoreCategory::Raw).join("aliases.json");
        let map: HashMap<&String, String> = self
            .aliases
            .iter()
            .map(|(url, path)| (url, path.display().to_string()))
            .collect();
        let json = serde_json::to_string_pretty(&map)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    // --- Processed / analysis JSON ---

    async fn save_json_stage(
        &mut self,
        category: StoreCategory,
        url: &str,
        title: &str,
        payload: serde_json::Value,
    ) -> Result<PathBuf, StorageError> {
        let mut object = match payload {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let serialized = serde_json::to_vec(&object)?;
        let hash = content_hash(&serialized);
        let stem = self.resolve_stem(url, title, &hash).await;

        object.insert(
            "_meta".to_string(),
            serde_json::to_value(MetaEnvelope {
                url: url.to_string(),
                saved_at: Utc::now(),
                filename: stem.clone(),
            })?,
        );

        let path = self.unique_path(category, &stem, "json");
        let bytes = serde_json::to_vec_pretty(&object)?;
        Self::write_atomic(&path, &bytes)?;
        self.record(&path, category, hash, bytes.len() as u64, Some(url));
        Ok(path)
    }

    /// Persist extracted content as JSON with a `_meta` envelope, keyed by
    /// the same stem as the raw artifact when one exists.
    pub async fn save_processed<T: Serialize>(
        &mut self,
        url: &str,
        title: &str,
        content: &T,
    ) -> Result<PathBuf, StorageError> {
        let value = serde_json::to_value(content)?;
        self.save_json_stage(StoreCategory::Processed, url, title, value).await
    }

    /// Persist an analysis result as JSON with a `_meta` envelope.
    pub async fn save_analysis<T: Serialize>(
        &mut self,
        url: &str,
        title: &str,
        analysis: &T,
    ) -> Result<PathBuf, StorageError> {
        let value = serde_json::to_value(analysis)?;
        self.save_json_stage(StoreCategory::Analysis, url, title, value).await
    }

    // --- Reports ---

    pub fn save_report(
        &mut self,
        name: &str,
        content: &str,
        format: ReportFormat,
    ) -> Result<PathBuf, StorageError> {
        let stem = sanitize(name);
        let path = self.unique_path(StoreCategory::Reports, &stem, format.extension());
        Self::write_atomic(&path, content.as_bytes())?;
        let hash = content_hash(content.as_bytes());
        self.record(&path, StoreCategory::Reports, hash, content.len() as u64, None);
        Ok(path)
    }

    // --- State ---

    pub fn state_path(&self, name: &str) -> PathBuf {
        self.category_dir(StoreCategory::State).join(format!("{name}.json"))
    }

    pub fn save_state<T: Serialize>(&mut self, name: &str, value: &T) -> Result<PathBuf, StorageError> {
        let path = self.state_path(name);
        let bytes = serde_json::to_vec_pretty(value)?;
        Self::write_atomic(&path, &bytes)?;
        let hash = content_hash(&bytes);
        self.record(&path, StoreCategory::State, hash, bytes.len() as u64, None);
        Ok(path)
    }

    pub fn load_state<T: DeserializeOwned>(&self, name: &str) -> Result<T, StorageError> {
        let json = std::fs::read_to_string(self.state_path(name))?;
        Ok(serde_json::from_str(&json)?)
    }

    // --- Stats ---

    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped
    }

    /// Paths of every analysis artifact written this run.
    pub fn analysis_files(&self) -> impl Iterator<Item = &StoredFile> {
        self.files
            .iter()
            .filter(|f| f.category == StoreCategory::Analysis)
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            duplicates_skipped: self.duplicates_skipped,
            ..StoreStats::default()
        };
        for file in &self.files {
            stats.total_files += 1;
            stats.total_bytes += file.size;
            let category = file.category.dir_name().to_string();
            *stats.files_by_category.entry(category.clone()).or_insert(0) += 1;
            *stats.bytes_by_category.entry(category).or_insert(0) += file.size;
        }
        stats
    }
}

/// SHA-256 of artifact bytes, hex encoded.
fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
