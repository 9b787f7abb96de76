//! View recording with optional repeat-visit suppression.

use std::{sync::Arc, time::Duration};

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::config::DedupSettings;
use crate::domain::{keys::KeySpace, visitor::VisitorId};

use super::store::{KeyValueStore, note_store_error};

const SOURCE: &str = "pageviews::recorder";
const METRIC_RECORDED: &str = "pageviews_recorded_total";
const METRIC_SUPPRESSED: &str = "pageviews_suppressed_total";

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Whether repeat views from one visitor within `window` are counted once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupPolicy {
    pub enabled: bool,
    pub window: Duration,
}

impl DedupPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            window: DEFAULT_DEDUP_WINDOW,
        }
    }

    pub fn within(window: Duration) -> Self {
        Self {
            enabled: true,
            window,
        }
    }
}

impl Default for DedupPolicy {
    fn default() -> Self {
        Self::within(DEFAULT_DEDUP_WINDOW)
    }
}

impl From<&DedupSettings> for DedupPolicy {
    fn from(settings: &DedupSettings) -> Self {
        Self {
            enabled: settings.enabled,
            window: settings.window,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The counter was incremented to this value.
    Counted(u64),
    /// The visitor already viewed this item inside the dedup window.
    Suppressed,
    /// The slug cannot be mapped to a counter key.
    Rejected,
    /// The store failed; the view was dropped.
    Failed,
}

pub struct ViewRecorder {
    store: Arc<dyn KeyValueStore>,
    keys: KeySpace,
    dedup: DedupPolicy,
}

impl ViewRecorder {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: KeySpace, dedup: DedupPolicy) -> Self {
        Self { store, keys, dedup }
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    /// Count one view of `slug`. Failures are logged and reported through
    /// the outcome, never as an error.
    #[instrument(skip(self, visitor), fields(category = %self.keys.category()))]
    pub async fn record_view(&self, slug: &str, visitor: Option<&VisitorId>) -> RecordOutcome {
        let key = match self.keys.counter_key(slug) {
            Ok(key) => key,
            Err(err) => {
                warn!(target: SOURCE, slug, error = %err, "Refusing to record invalid slug");
                return RecordOutcome::Rejected;
            }
        };

        if self.dedup.enabled
            && let Some(visitor) = visitor
            && !self.first_view_in_window(visitor, slug).await
        {
            counter!(METRIC_SUPPRESSED).increment(1);
            debug!(target: SOURCE, slug, visitor = %visitor, "Suppressed repeat view");
            return RecordOutcome::Suppressed;
        }

        match self.store.increment(key.as_str()).await {
            Ok(views) => {
                counter!(METRIC_RECORDED).increment(1);
                debug!(target: SOURCE, slug, views, "Recorded view");
                RecordOutcome::Counted(views)
            }
            Err(err) => {
                note_store_error("increment", &err);
                RecordOutcome::Failed
            }
        }
    }

    /// Record on the runtime without making the caller wait. Dropping the
    /// handle leaves the task running to completion.
    pub fn spawn_record(
        self: &Arc<Self>,
        slug: impl Into<String>,
        visitor: Option<VisitorId>,
    ) -> JoinHandle<RecordOutcome> {
        let recorder = Arc::clone(self);
        let slug = slug.into();
        tokio::spawn(async move { recorder.record_view(&slug, visitor.as_ref()).await })
    }

    /// Mark the visitor as having seen `slug`. Returns `true` when this view
    /// should be counted; dedup failures count the view.
    async fn first_view_in_window(&self, visitor: &VisitorId, slug: &str) -> bool {
        let seen = match self.keys.seen_key(visitor, slug) {
            Ok(seen) => seen,
            Err(_) => return true,
        };

        match self
            .store
            .set_if_absent(seen.as_str(), "1", self.dedup.window)
            .await
        {
            Ok(created) => created,
            Err(err) => {
                note_store_error("set_if_absent", &err);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::application::aggregator::ViewAggregator;
    use crate::application::store::StoreError;
    use crate::infra::memory::MemoryStore;

    fn setup(dedup: DedupPolicy) -> (Arc<ViewRecorder>, ViewAggregator) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let recorder = Arc::new(ViewRecorder::new(
            store.clone(),
            KeySpace::default(),
            dedup,
        ));
        let aggregator = ViewAggregator::new(store, KeySpace::default());
        (recorder, aggregator)
    }

    /// Reads succeed, every write fails.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl KeyValueStore for ReadOnlyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }

        async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
            self.0.batch_get(keys).await
        }

        async fn increment(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::connection("READONLY replica"))
        }

        async fn set_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::connection("READONLY replica"))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn three_views_count_three() {
        let (recorder, aggregator) = setup(DedupPolicy::disabled());
        for expected in 1..=3 {
            assert_eq!(
                recorder.record_view("a", None).await,
                RecordOutcome::Counted(expected)
            );
        }
        assert_eq!(aggregator.get_count("a").await, 3);
    }

    #[tokio::test]
    async fn repeat_views_from_one_visitor_are_suppressed() {
        let (recorder, aggregator) = setup(DedupPolicy::default());
        let visitor = VisitorId::generate();
        let other = VisitorId::generate();

        assert_eq!(
            recorder.record_view("a", Some(&visitor)).await,
            RecordOutcome::Counted(1)
        );
        assert_eq!(
            recorder.record_view("a", Some(&visitor)).await,
            RecordOutcome::Suppressed
        );
        assert_eq!(
            recorder.record_view("b", Some(&visitor)).await,
            RecordOutcome::Counted(1)
        );
        assert_eq!(
            recorder.record_view("a", Some(&other)).await,
            RecordOutcome::Counted(2)
        );
        assert_eq!(aggregator.get_count("a").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn views_count_again_after_the_window() {
        let (recorder, _) = setup(DedupPolicy::within(Duration::from_secs(60)));
        let visitor = VisitorId::generate();

        recorder.record_view("a", Some(&visitor)).await;
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(
            recorder.record_view("a", Some(&visitor)).await,
            RecordOutcome::Counted(2)
        );
    }

    #[tokio::test]
    async fn anonymous_views_skip_dedup() {
        let (recorder, _) = setup(DedupPolicy::default());
        recorder.record_view("a", None).await;
        assert_eq!(
            recorder.record_view("a", None).await,
            RecordOutcome::Counted(2)
        );
    }

    #[tokio::test]
    async fn invalid_slug_is_rejected() {
        let (recorder, _) = setup(DedupPolicy::default());
        assert_eq!(
            recorder.record_view("no:colons", None).await,
            RecordOutcome::Rejected
        );
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let recorder = ViewRecorder::new(
            Arc::new(ReadOnlyStore(MemoryStore::new())),
            KeySpace::default(),
            DedupPolicy::default(),
        );
        let visitor = VisitorId::generate();
        assert_eq!(
            recorder.record_view("a", Some(&visitor)).await,
            RecordOutcome::Failed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_lose_no_updates() {
        const K: u64 = 64;
        let (recorder, aggregator) = setup(DedupPolicy::disabled());

        let handles: Vec<_> = (0..K).map(|_| recorder.spawn_record("hot", None)).collect();
        for outcome in futures::future::join_all(handles).await {
            assert!(matches!(outcome.expect("join"), RecordOutcome::Counted(_)));
        }

        assert_eq!(aggregator.get_count("hot").await, K);
    }
}
