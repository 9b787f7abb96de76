//! Time-bounded cache over the aggregator's read path.
//!
//! A read is fresh for the configured window. Inside the window callers get
//! the stored counts without touching the store; the first call after the
//! window reads through and starts a new window. Degraded reads (zeros
//! produced while the store is unreachable) are cached like any other.

use std::{num::NonZeroUsize, sync::Arc, sync::RwLock, time::Duration};

use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use crate::application::aggregator::{ViewAggregator, ViewCounts};
use crate::config::RevalidateSettings;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "pageviews::cache";
const METRIC_HIT: &str = "pageviews_cache_hit_total";
const METRIC_MISS: &str = "pageviews_cache_miss_total";

/// Window during which a rendered count is served from cache.
pub const DEFAULT_REVALIDATE_SECS: u64 = 60;
pub const DEFAULT_REVALIDATE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevalidationConfig {
    /// Zero disables caching.
    pub window: Duration,
    pub capacity: NonZeroUsize,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_REVALIDATE_SECS),
            capacity: NonZeroUsize::new(DEFAULT_REVALIDATE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&RevalidateSettings> for RevalidationConfig {
    fn from(settings: &RevalidateSettings) -> Self {
        Self {
            window: settings.window,
            capacity: settings.capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ReadKey {
    One(String),
    Many(Vec<String>),
}

struct Entry {
    counts: ViewCounts,
    fetched_at: Instant,
}

pub struct RevalidatingCounts {
    aggregator: Arc<ViewAggregator>,
    config: RevalidationConfig,
    entries: RwLock<LruCache<ReadKey, Entry>>,
}

impl RevalidatingCounts {
    pub fn new(aggregator: Arc<ViewAggregator>, config: RevalidationConfig) -> Self {
        Self {
            aggregator,
            config,
            entries: RwLock::new(LruCache::new(config.capacity)),
        }
    }

    pub fn config(&self) -> RevalidationConfig {
        self.config
    }

    pub fn aggregator(&self) -> &Arc<ViewAggregator> {
        &self.aggregator
    }

    pub async fn get_count(&self, slug: &str) -> u64 {
        let key = ReadKey::One(slug.to_string());
        if let Some(counts) = self.fresh(&key) {
            return counts.views(slug);
        }
        self.refresh_count(key, slug).await
    }

    pub async fn get_counts<S: AsRef<str>>(&self, slugs: &[S]) -> ViewCounts {
        let key = many_key(slugs);
        if let Some(counts) = self.fresh(&key) {
            return counts;
        }
        self.refresh_counts(key, slugs).await
    }

    /// Read through regardless of freshness and restart the window.
    pub async fn force_refresh_count(&self, slug: &str) -> u64 {
        self.refresh_count(ReadKey::One(slug.to_string()), slug).await
    }

    /// Read through regardless of freshness and restart the window.
    pub async fn force_refresh_counts<S: AsRef<str>>(&self, slugs: &[S]) -> ViewCounts {
        self.refresh_counts(many_key(slugs), slugs).await
    }

    pub fn invalidate_all(&self) {
        rw_write(&self.entries, SOURCE, "invalidate_all").clear();
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh(&self, key: &ReadKey) -> Option<ViewCounts> {
        if self.config.window.is_zero() {
            return None;
        }

        let mut entries = rw_write(&self.entries, SOURCE, "fresh");
        let hit = entries
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.config.window)
            .map(|entry| entry.counts.clone());

        if hit.is_some() {
            counter!(METRIC_HIT).increment(1);
            debug!(target: SOURCE, outcome = "hit", "Serving cached view counts");
        } else {
            counter!(METRIC_MISS).increment(1);
            debug!(target: SOURCE, outcome = "miss", "Revalidating view counts");
        }
        hit
    }

    async fn refresh_count(&self, key: ReadKey, slug: &str) -> u64 {
        let views = self.aggregator.get_count(slug).await;
        self.store(key, std::iter::once((slug.to_string(), views)).collect());
        views
    }

    async fn refresh_counts<S: AsRef<str>>(&self, key: ReadKey, slugs: &[S]) -> ViewCounts {
        let counts = self.aggregator.get_counts(slugs).await;
        self.store(key, counts.clone());
        counts
    }

    fn store(&self, key: ReadKey, counts: ViewCounts) {
        if self.config.window.is_zero() {
            return;
        }
        rw_write(&self.entries, SOURCE, "store").put(
            key,
            Entry {
                counts,
                fetched_at: Instant::now(),
            },
        );
    }
}

fn many_key<S: AsRef<str>>(slugs: &[S]) -> ReadKey {
    ReadKey::Many(slugs.iter().map(|s| s.as_ref().to_string()).collect())
}
