use rand::Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::Path;
use url::Url;

use super::url::{domain_of, normalize, url_key, UrlFilter};
use crate::models::{LinkType, Priority};

/// How many top entries the ε-greedy pop may swap between.
const EXPLORATION_WINDOW: usize = 10;

/// One pending URL with its priority metadata. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierItem {
    pub url: String,
    pub depth: u32,
    pub base_priority: Priority,
    pub ai_score: f64,
    pub link_type: LinkType,
    pub parent_url: Option<String>,
    pub enqueue_seq: u64,
    pub reason: String,
}

impl FrontierItem {
    /// Ordering key, ascending: smaller wins the pop.
    fn sort_key(&self, depth_penalty: f64) -> f64 {
        -(self.base_priority.bonus() + 2.0 * self.ai_score + self.link_type.bonus()
            - depth_penalty * self.depth as f64)
    }
}

/// Heap entry with the sort key precomputed at push time, so the ordering
/// is an explicit total order instead of a sign convention scattered
/// through comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HeapEntry {
    sort_key: f64,
    item: FrontierItem,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest sort key pops
        // first. Ties break by depth ascending, then enqueue order.
        other
            .sort_key
            .total_cmp(&self.sort_key)
            .then_with(|| other.item.depth.cmp(&self.item.depth))
            .then_with(|| other.item.enqueue_seq.cmp(&self.item.enqueue_seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Push-time counters. `total_added + duplicates_skipped + filtered_out`
/// partitions every push attempt over the life of the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontierCounters {
    pub total_added: u64,
    pub duplicates_skipped: u64,
    pub filtered_out: u64,
    /// Subset of `filtered_out` rejected by the depth cap.
    pub depth_exceeded: u64,
    pub popped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontierStats {
    pub in_frontier: usize,
    pub processed: usize,
    pub failed: usize,
    pub distinct_domains: usize,
    pub counters: FrontierCounters,
}

/// Serialized snapshot for checkpoint files.
#[derive(Serialize, Deserialize)]
struct FrontierState {
    entries: Vec<HeapEntry>,
    seen: HashSet<String>,
    processed: HashSet<String>,
    failed: HashSet<String>,
    retry_counts: HashMap<String, u32>,
    counters: FrontierCounters,
    domain_counts: HashMap<String, u32>,
    next_seq: u64,
    max_depth: u32,
    depth_penalty: f64,
    exploration_rate: f64,
    max_retries: u32,
}

/// Priority frontier: a min-ordered heap plus the seen/processed/failed
/// sets keyed by canonical URL hash. A key lives in at most one of
/// {unseen, in-frontier, processed, failed} at any time.
pub struct Frontier {
    heap: BinaryHeap<HeapEntry>,
    /// Keys currently enqueued (not yet terminal).
    seen: HashSet<String>,
    processed: HashSet<String>,
    failed: HashSet<String>,
    /// Retries consumed per key; never cleared, capped by `max_retries`.
    retry_counts: HashMap<String, u32>,
    counters: FrontierCounters,
    domain_counts: HashMap<String, u32>,
    next_seq: u64,
    filter: UrlFilter,
    max_depth: u32,
    depth_penalty: f64,
    exploration_rate: f64,
    max_retries: u32,
}

impl Frontier {
    pub fn new(
        filter: UrlFilter,
        max_depth: u32,
        depth_penalty: f64,
        exploration_rate: f64,
        max_retries: u32,
    ) -> Self {
        Frontier {
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            processed: HashSet::new(),
            failed: HashSet::new(),
            retry_counts: HashMap::new(),
            counters: FrontierCounters::default(),
            domain_counts: HashMap::new(),
            next_seq: 0,
            filter,
            max_depth,
            depth_penalty,
            exploration_rate,
            max_retries,
        }
    }

    /// Push one URL. Returns false when normalization fails, the filter
    /// rejects it, the depth cap is exceeded, or the key was already seen;
    /// the matching counter is incremented in each case.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &mut self,
        raw_url: &str,
        base_priority: Priority,
        depth: u32,
        parent_url: Option<&str>,
        ai_score: f64,
        link_type: LinkType,
        reason: &str,
    ) -> bool {
        let Some(url) = normalize(raw_url, None) else {
            self.counters.filtered_out += 1;
            return false;
        };

        if let Err(rejection) = self.filter.check(&url) {
            tracing::trace!(url = %url, %rejection, "URL filtered out");
            self.counters.filtered_out += 1;
            return false;
        }

        if depth > self.max_depth {
            self.counters.filtered_out += 1;
            self.counters.depth_exceeded += 1;
            return false;
        }

        let key = url_key(&url);
        if self.seen.contains(&key) || self.processed.contains(&key) || self.failed.contains(&key) {
            self.counters.duplicates_skipped += 1;
            return false;
        }

        let item = FrontierItem {
            url: url.to_string(),
            depth,
            base_priority,
            ai_score,
            link_type,
            parent_url: parent_url.map(|p| p.to_string()),
            enqueue_seq: self.next_seq,
            reason: reason.to_string(),
        };
        self.next_seq += 1;

        let sort_key = item.sort_key(self.depth_penalty);
        tracing::debug!(url = %item.url, depth, priority = base_priority.level(), sort_key, reason, "URL enqueued");

        self.heap.push(HeapEntry { sort_key, item });
        self.seen.insert(key);
        *self.domain_counts.entry(domain_of(&url)).or_insert(0) += 1;
        self.counters.total_added += 1;
        true
    }

    /// Pop the next item. With probability `exploration_rate` (and more
    /// than one entry), a uniformly random entry from the top window is
    /// taken instead of the minimum.
    pub fn pop(&mut self) -> Option<FrontierItem> {
        if self.heap.is_empty() {
            return None;
        }

        let explore = self.heap.len() > 1
            && self.exploration_rate > 0.0
            && rand::thread_rng().gen::<f64>() < self.exploration_rate;

        let entry = if explore {
            let window = EXPLORATION_WINDOW.min(self.heap.len());
            let mut top: Vec<HeapEntry> = Vec::with_capacity(window);
            for _ in 0..window {
                if let Some(e) = self.heap.pop() {
                    top.push(e);
                }
            }
            let pick = rand::thread_rng().gen_range(0..top.len());
            let chosen = top.swap_remove(pick);
            for e in top {
                self.heap.push(e);
            }
            chosen
        } else {
            self.heap.pop()?
        };

        self.counters.popped += 1;
        Some(entry.item)
    }

    /// Move a key from in-frontier into its terminal set.
    pub fn mark_processed(&mut self, url: &str, success: bool) {
        let Some(normalized) = normalize(url, None) else {
            return;
        };
        let key = url_key(&normalized);
        self.seen.remove(&key);
        if success {
            self.processed.insert(key);
        } else {
            self.failed.insert(key);
        }
    }

    /// Explicitly re-enqueue a previously failed URL, bounded by
    /// `max_retries` per key. Nothing re-enqueues automatically.
    pub fn retry(&mut self, url: &str, depth: u32) -> bool {
        let Some(normalized) = normalize(url, None) else {
            return false;
        };
        let key = url_key(&normalized);
        if !self.failed.contains(&key) {
            return false;
        }
        let used = self.retry_counts.get(&key).copied().unwrap_or(0);
        if used >= self.max_retries {
            return false;
        }
        self.failed.remove(&key);
        let added = self.add(
            normalized.as_str(),
            Priority::Medium,
            depth,
            None,
            0.0,
            LinkType::General,
            "retry",
        );
        if added {
            self.retry_counts.insert(key, used + 1);
            tracing::info!(url = %normalized, retries_used = used + 1, "Retrying failed URL");
        } else {
            self.failed.insert(key);
        }
        added
    }

    /// Whether this canonical key has already been enqueued or resolved.
    pub fn has_seen(&self, url: &Url) -> bool {
        let key = url_key(url);
        self.seen.contains(&key) || self.processed.contains(&key) || self.failed.contains(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn counters(&self) -> &FrontierCounters {
        &self.counters
    }

    pub fn stats(&self) -> FrontierStats {
        FrontierStats {
            in_frontier: self.heap.len(),
            processed: self.processed.len(),
            failed: self.failed.len(),
            distinct_domains: self.domain_counts.len(),
            counters: self.counters.clone(),
        }
    }

    // --- Persistence ---

    /// Serialize heap, sets, and counters to a JSON checkpoint.
    pub fn save_state(&self, path: &Path) -> std::io::Result<()> {
        let state = FrontierState {
            entries: self.heap.iter().cloned().collect(),
            seen: self.seen.clone(),
            processed: self.processed.clone(),
            failed: self.failed.clone(),
            retry_counts: self.retry_counts.clone(),
            counters: self.counters.clone(),
            domain_counts: self.domain_counts.clone(),
            next_seq: self.next_seq,
            max_depth: self.max_depth,
            depth_penalty: self.depth_penalty,
            exploration_rate: self.exploration_rate,
            max_retries: self.max_retries,
        };
        let json = serde_json::to_string_pretty(&state)?;
        std::fs::write(path, json)
    }

    /// Restore a frontier from a checkpoint and re-heapify. The URL filter
    /// is reconstructed from configuration, not persisted.
    pub fn load_state(path: &Path, filter: UrlFilter) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let state: FrontierState = serde_json::from_str(&json)?;
        Ok(Frontier {
            heap: state.entries.into_iter().collect(),
            seen: state.seen,
            processed: state.processed,
            failed: state.failed,
            retry_counts: state.retry_counts,
            counters: state.counters,
            domain_counts: state.domain_counts,
            next_seq: state.next_seq,
            filter,
            max_depth: state.max_depth,
            depth_penalty: state.depth_penalty,
            exploration_rate: state.exploration_rate,
            max_retries: state.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deterministic_frontier(max_depth: u32) -> Frontier {
        Frontier::new(UrlFilter::default(), max_depth, 0.5, 0.0, 0)
    }

    fn add_simple(frontier: &mut Frontier, url: &str, priority: Priority, depth: u32) -> bool {
        frontier.add(url, priority, depth, None, 0.0, LinkType::General, "test")
    }

    #[test]
    fn test_pop_order_by_priority() {
        let mut frontier = deterministic_frontier(3);
        add_simple(&mut frontier, "https://ex.com/low", Priority::Low, 0);
        add_simple(&mut frontier, "https://ex.com/high", Priority::High, 0);
        add_simple(&mut frontier, "https://ex.com/medium", Priority::Medium, 0);

        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/high");
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/medium");
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/low");
        assert!(frontier.pop().is_none());
    }

    #[test]
    fn test_ai_score_outweighs_base_priority() {
        let mut frontier = deterministic_frontier(3);
        add_simple(&mut frontier, "https://ex.com/plain-high", Priority::High, 0);
        // low base (1.0) + 2*1.5 = 4.0 beats high base 3.0
        frontier.add(
            "https://ex.com/scored-low",
            Priority::Low,
            0,
            None,
            1.5,
            LinkType::General,
            "test",
        );
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/scored-low");
    }

    #[test]
    fn test_type_bonus_affects_order() {
        let mut frontier = deterministic_frontier(3);
        frontier.add(
            "https://ex.com/news/today",
            Priority::Medium,
            0,
            None,
            0.0,
            LinkType::News,
            "test",
        );
        frontier.add(
            "https://ex.com/admission/apply",
            Priority::Medium,
            0,
            None,
            0.0,
            LinkType::Admission,
            "test",
        );
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/admission/apply");
    }

    #[test]
    fn test_depth_penalty_prefers_shallow() {
        let mut frontier = deterministic_frontier(5);
        add_simple(&mut frontier, "https://ex.com/deep", Priority::Medium, 4);
        add_simple(&mut frontier, "https://ex.com/shallow", Priority::Medium, 1);
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/shallow");
    }

    #[test]
    fn test_tie_broken_by_enqueue_order() {
        let mut frontier = deterministic_frontier(3);
        add_simple(&mut frontier, "https://ex.com/first", Priority::Medium, 1);
        add_simple(&mut frontier, "https://ex.com/second", Priority::Medium, 1);
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/first");
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/second");
    }

    #[test]
    fn test_duplicate_push_skipped() {
        let mut frontier = deterministic_frontier(3);
        assert!(add_simple(&mut frontier, "https://ex.com/a", Priority::High, 0));
        // Same key after normalization (trailing slash)
        assert!(!add_simple(&mut frontier, "https://ex.com/a/", Priority::High, 0));
        assert_eq!(frontier.counters().duplicates_skipped, 1);
        assert_eq!(frontier.len(), 1);
    }

    #[test]
    fn test_depth_cap_rejected() {
        let mut frontier = deterministic_frontier(0);
        assert!(add_simple(&mut frontier, "https://ex.com/", Priority::High, 0));
        assert!(!add_simple(&mut frontier, "https://ex.com/next", Priority::High, 1));
        assert_eq!(frontier.counters().depth_exceeded, 1);
        assert_eq!(frontier.counters().filtered_out, 1);
    }

    #[test]
    fn test_filter_rejection_counted() {
        let filter = UrlFilter::new(vec![], vec!["/login".to_string()]);
        let mut frontier = Frontier::new(filter, 3, 0.5, 0.0, 0);
        assert!(!add_simple(
            &mut frontier,
            "https://ex.com/login?next=/",
            Priority::High,
            0
        ));
        assert_eq!(frontier.counters().filtered_out, 1);
    }

    #[test]
    fn test_counters_partition_push_attempts() {
        let mut frontier = deterministic_frontier(1);
        let attempts = [
            ("https://ex.com/a", 0u32),
            ("https://ex.com/a/", 0), // duplicate
            ("https://ex.com/b", 2),  // depth exceeded
            ("not a url", 0),         // normalize failure
            ("https://ex.com/c", 1),
        ];
        for (url, depth) in attempts {
            add_simple(&mut frontier, url, Priority::Medium, depth);
        }
        let counters = frontier.counters();
        assert_eq!(
            counters.total_added + counters.duplicates_skipped + counters.filtered_out,
            attempts.len() as u64
        );
        assert_eq!(counters.total_added, 2);
    }

    #[test]
    fn test_mark_processed_moves_key() {
        let mut frontier = deterministic_frontier(3);
        add_simple(&mut frontier, "https://ex.com/a", Priority::High, 0);
        let item = frontier.pop().unwrap();
        frontier.mark_processed(&item.url, true);
        assert_eq!(frontier.processed_count(), 1);

        // A processed key is still a duplicate on re-push
        assert!(!add_simple(&mut frontier, "https://ex.com/a", Priority::High, 0));
        assert_eq!(frontier.counters().duplicates_skipped, 1);
    }

    #[test]
    fn test_failed_key_not_reenqueued_without_retry() {
        let mut frontier = deterministic_frontier(3);
        add_simple(&mut frontier, "https://ex.com/a", Priority::High, 0);
        frontier.pop();
        frontier.mark_processed("https://ex.com/a", false);
        assert_eq!(frontier.failed_count(), 1);
        assert!(!add_simple(&mut frontier, "https://ex.com/a", Priority::High, 0));
    }

    #[test]
    fn test_retry_denied_at_default_cap() {
        let mut frontier = deterministic_frontier(3);
        add_simple(&mut frontier, "https://ex.com/a", Priority::High, 0);
        frontier.pop();
        frontier.mark_processed("https://ex.com/a", false);
        // max_retries defaults to 0 in these fixtures: no retry budget
        assert!(!frontier.retry("https://ex.com/a", 0));
    }

    #[test]
    fn test_retry_respects_cap() {
        let mut frontier = Frontier::new(UrlFilter::default(), 3, 0.5, 0.0, 1);
        add_simple(&mut frontier, "https://ex.com/a", Priority::High, 0);
        frontier.pop();
        frontier.mark_processed("https://ex.com/a", false);
        assert!(frontier.retry("https://ex.com/a", 0));
        frontier.pop();
        frontier.mark_processed("https://ex.com/a", false);
        assert!(!frontier.retry("https://ex.com/a", 0));
    }

    #[test]
    fn test_exploration_on_single_item() {
        let mut frontier = Frontier::new(UrlFilter::default(), 3, 0.5, 1.0, 0);
        add_simple(&mut frontier, "https://ex.com/only", Priority::Low, 0);
        // exploration_rate = 1.0 with one item must still return it
        assert_eq!(frontier.pop().unwrap().url, "https://ex.com/only");
    }

    #[test]
    fn test_exploration_pop_loses_nothing() {
        let mut frontier = Frontier::new(UrlFilter::default(), 3, 0.5, 1.0, 0);
        for i in 0..25 {
            add_simple(
                &mut frontier,
                &format!("https://ex.com/page{i}"),
                Priority::Medium,
                0,
            );
        }
        let mut popped = HashSet::new();
        while let Some(item) = frontier.pop() {
            popped.insert(item.url);
        }
        assert_eq!(popped.len(), 25);
    }

    #[test]
    fn test_save_load_roundtrip_preserves_pop_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frontier.json");

        let mut frontier = deterministic_frontier(3);
        add_simple(&mut frontier, "https://ex.com/low", Priority::Low, 0);
        add_simple(&mut frontier, "https://ex.com/high", Priority::High, 0);
        add_simple(&mut frontier, "https://ex.com/mid", Priority::Medium, 1);
        frontier.mark_processed("https://ex.com/done", true);
        frontier.save_state(&path).unwrap();

        let mut restored = Frontier::load_state(&path, UrlFilter::default()).unwrap();
        let mut original_order = Vec::new();
        while let Some(item) = frontier.pop() {
            original_order.push(item.url);
        }
        let mut restored_order = Vec::new();
        while let Some(item) = restored.pop() {
            restored_order.push(item.url);
        }
        assert_eq!(original_order, restored_order);
        assert_eq!(restored.counters().total_added, 3);
    }
}
