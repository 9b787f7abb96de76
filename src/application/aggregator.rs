//! Batched view-count reads for listings and detail pages.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Instant,
};

use metrics::{counter, histogram};
use tracing::{instrument, warn};

use crate::domain::keys::{CounterKey, KeySpace};

use super::store::{KeyValueStore, note_store_error};

const SOURCE: &str = "pageviews::aggregator";
const METRIC_BATCH_GET_MS: &str = "pageviews_batch_get_ms";
const METRIC_INVALID_VALUE: &str = "pageviews_invalid_value_total";

/// View counts keyed by slug, in the order the slugs were requested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewCounts {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl ViewCounts {
    pub fn get(&self, slug: &str) -> Option<u64> {
        self.index.get(slug).map(|&i| self.entries[i].1)
    }

    /// Count for `slug`, zero when it was not part of the request.
    pub fn views(&self, slug: &str) -> u64 {
        self.get(slug).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.entries.iter().map(|(slug, views)| (slug.as_str(), *views))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_map(self) -> HashMap<String, u64> {
        self.entries.into_iter().collect()
    }
}

/// Later duplicates of a slug are ignored; the first occurrence fixes its
/// position.
impl FromIterator<(String, u64)> for ViewCounts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut counts = ViewCounts::default();
        for (slug, views) in iter {
            if counts.index.contains_key(&slug) {
                continue;
            }
            counts.index.insert(slug.clone(), counts.entries.len());
            counts.entries.push((slug, views));
        }
        counts
    }
}

impl IntoIterator for ViewCounts {
    type Item = (String, u64);
    type IntoIter = std::vec::IntoIter<(String, u64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Read-only view of the counters for one content type.
pub struct ViewAggregator {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
}

impl ViewAggregator {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    /// Current count for one item. Store failures and unreadable values
    /// degrade to zero.
    #[instrument(skip(self), fields(category = %self.keys.category()))]
    pub async fn get_count(&self, slug: &str) -> u64 {
        let key = match self.keys.counter_key(slug) {
            Ok(key) => key,
            Err(err) => {
                warn!(target: SOURCE, slug, error = %err, "Refusing to read invalid slug");
                return 0;
            }
        };

        match self.store.get(key.as_str()).await {
            Ok(raw) => parse_count(raw.as_deref(), &key),
            Err(err) => {
                note_store_error("get", &err);
                0
            }
        }
    }

    /// Counts for a listing, read with a single batched request.
    #[instrument(skip_all, fields(category = %self.keys.category(), requested = slugs.len()))]
    pub async fn get_counts<S: AsRef<str>>(&self, slugs: &[S]) -> ViewCounts {
        let mut ordered: Vec<String> = Vec::with_capacity(slugs.len());
        let mut seen = HashSet::with_capacity(slugs.len());
        let mut lookups: Vec<(usize, CounterKey)> = Vec::with_capacity(slugs.len());

        for slug in slugs {
            let slug = slug.as_ref();
            if !seen.insert(slug) {
                continue;
            }
            match self.keys.counter_key(slug) {
                Ok(key) => lookups.push((ordered.len(), key)),
                Err(err) => {
                    warn!(target: SOURCE, slug, error = %err, "Refusing to read invalid slug");
                }
            }
            ordered.push(slug.to_string());
        }

        let mut values = vec![0_u64; ordered.len()];
        if !lookups.is_empty() {
            let keys: Vec<String> = lookups
                .iter()
                .map(|(_, key)| key.as_str().to_string())
                .collect();

            let started = Instant::now();
            let result = self.store.batch_get(&keys).await;
            histogram!(METRIC_BATCH_GET_MS).record(started.elapsed().as_secs_f64() * 1000.0);

            match result {
                Ok(raws) => {
                    for ((position, key), raw) in lookups.iter().zip(raws) {
                        values[*position] = parse_count(raw.as_deref(), key);
                    }
                }
                Err(err) => note_store_error("batch_get", &err),
            }
        }

        ordered.into_iter().zip(values).collect()
    }
}

/// Interpret a stored counter value. Absent is zero; anything that is not a
/// non-negative integer is a data-integrity fault reported as zero.
pub fn parse_count(raw: Option<&str>, key: &CounterKey) -> u64 {
    let Some(raw) = raw else {
        return 0;
    };

    match raw.trim().parse::<u64>() {
        Ok(value) => value,
        Err(_) => {
            counter!(METRIC_INVALID_VALUE).increment(1);
            warn!(
                target: SOURCE,
                key = %key,
                value = raw,
                "Stored view count is not a non-negative integer; treating as zero"
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::application::store::StoreError;
    use crate::infra::memory::MemoryStore;

    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn batch_get(&self, _keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
            Err(StoreError::connection("connection refused"))
        }

        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn set_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }
    }

    fn aggregator(store: Arc<MemoryStore>) -> ViewAggregator {
        ViewAggregator::new(store, KeySpace::default())
    }

    #[tokio::test]
    async fn unknown_slugs_read_zero() {
        let agg = aggregator(Arc::new(MemoryStore::new()));
        assert_eq!(agg.get_count("never-viewed").await, 0);

        let counts = agg.get_counts(&["a", "b"]).await;
        assert_eq!(counts.get("a"), Some(0));
        assert_eq!(counts.get("b"), Some(0));
        assert_eq!(counts.len(), 2);
    }

    #[tokio::test]
    async fn batched_counts_match_individual_reads() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw("pageviews:projects:s1", "5");
        store.insert_raw("pageviews:projects:s3", "12");
        let agg = aggregator(store);

        let counts = agg.get_counts(&["s1", "s2", "s3"]).await;
        for slug in ["s1", "s2", "s3"] {
            assert_eq!(counts.get(slug), Some(agg.get_count(slug).await), "{slug}");
        }
        let order: Vec<_> = counts.iter().map(|(slug, _)| slug).collect();
        assert_eq!(order, ["s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn non_numeric_value_reads_zero() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw("pageviews:projects:a", "not-a-number");
        store.insert_raw("pageviews:projects:b", "-4");
        let agg = aggregator(store);

        assert_eq!(agg.get_count("a").await, 0);
        let counts = agg.get_counts(&["a", "b"]).await;
        assert_eq!(counts.views("a"), 0);
        assert_eq!(counts.views("b"), 0);
    }

    #[tokio::test]
    async fn duplicate_and_invalid_slugs_are_tolerated() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw("pageviews:projects:a", "3");
        let agg = aggregator(store);

        let counts = agg.get_counts(&["a", "bad slug", "a"]).await;
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.get("a"), Some(3));
        assert_eq!(counts.get("bad slug"), Some(0));
        assert_eq!(agg.get_count("bad:slug").await, 0);
    }

    #[tokio::test]
    async fn empty_listing_needs_no_store() {
        let agg = ViewAggregator::new(Arc::new(DownStore), KeySpace::default());
        let empty: [&str; 0] = [];
        assert!(agg.get_counts(&empty).await.is_empty());
    }

    #[tokio::test]
    async fn store_failures_degrade_to_zero() {
        let agg = ViewAggregator::new(Arc::new(DownStore), KeySpace::default());
        assert_eq!(agg.get_count("a").await, 0);

        let counts = agg.get_counts(&["a", "b"]).await;
        assert_eq!(counts.clone().into_map(), HashMap::from([
            ("a".to_string(), 0),
            ("b".to_string(), 0),
        ]));
    }

    #[test]
    fn parse_count_accepts_padded_integers() {
        let key = KeySpace::default().counter_key("a").expect("key");
        assert_eq!(parse_count(None, &key), 0);
        assert_eq!(parse_count(Some("42"), &key), 42);
        assert_eq!(parse_count(Some(" 7 "), &key), 7);
        assert_eq!(parse_count(Some("4.5"), &key), 0);
    }
}
