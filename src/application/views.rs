//! Consumer-facing view counting.
//!
//! Renders and view events go through [`PageViews`]; nothing above this
//! module talks to the store directly.

use std::{collections::BTreeMap, sync::Arc};

use tokio::task::JoinHandle;

use crate::cache::{RevalidatingCounts, RevalidationConfig};
use crate::domain::{error::DomainError, keys::KeySpace, keys::validate_slug};

use super::aggregator::{ViewAggregator, ViewCounts};
use super::identity::IdentityProvider;
use super::ranking::{RankedItem, select_featured};
use super::recorder::{DedupPolicy, RecordOutcome, ViewRecorder};
use super::store::KeyValueStore;

/// View counting for one content type.
pub struct PageViews {
    keys: KeySpace,
    counts: RevalidatingCounts,
    recorder: Arc<ViewRecorder>,
}

impl PageViews {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        keys: KeySpace,
        revalidation: RevalidationConfig,
        dedup: DedupPolicy,
    ) -> Self {
        let aggregator = Arc::new(ViewAggregator::new(store.clone(), keys.clone()));
        Self {
            counts: RevalidatingCounts::new(aggregator, revalidation),
            recorder: Arc::new(ViewRecorder::new(store, keys.clone(), dedup)),
            keys,
        }
    }

    pub fn category(&self) -> &str {
        self.keys.category()
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    pub fn cache(&self) -> &RevalidatingCounts {
        &self.counts
    }

    pub async fn get_count(&self, slug: &str) -> u64 {
        self.counts.get_count(slug).await
    }

    pub async fn get_counts<S: AsRef<str>>(&self, slugs: &[S]) -> ViewCounts {
        self.counts.get_counts(slugs).await
    }

    /// Counts read straight from the store; the cached entry is replaced.
    pub async fn fresh_counts<S: AsRef<str>>(&self, slugs: &[S]) -> ViewCounts {
        self.counts.force_refresh_counts(slugs).await
    }

    /// Featured listing over `slugs`: `pinned` first, then most viewed.
    pub async fn featured<S: AsRef<str>>(
        &self,
        slugs: &[S],
        pinned: &[String],
        limit: usize,
    ) -> Vec<RankedItem> {
        let counts = self.get_counts(slugs).await;
        select_featured(&counts, pinned, limit)
    }

    /// Queue one view of `slug` for the visitor `identity` resolves to.
    ///
    /// Only slug validation can fail; the store write happens on a spawned
    /// task and its failures are absorbed there.
    pub fn record_view(
        &self,
        slug: &str,
        identity: &dyn IdentityProvider,
    ) -> Result<JoinHandle<RecordOutcome>, DomainError> {
        validate_slug(slug)?;
        let visitor = identity.resolve();
        Ok(self.recorder.spawn_record(slug, visitor))
    }
}

/// Every configured content type, addressed by category.
pub struct ContentTypes {
    by_category: BTreeMap<String, Arc<PageViews>>,
    default_category: String,
}

impl ContentTypes {
    /// Build one [`PageViews`] per category sharing `store`. The first
    /// category is the default for callers that do not name one.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        namespace: &str,
        categories: &[String],
        revalidation: RevalidationConfig,
        dedup: DedupPolicy,
    ) -> Result<Self, DomainError> {
        let Some(first) = categories.first() else {
            return Err(DomainError::validation(
                "at least one content category is required",
            ));
        };

        let mut by_category = BTreeMap::new();
        for category in categories {
            let keys = KeySpace::new(namespace, category.as_str())?;
            let views = PageViews::new(store.clone(), keys, revalidation, dedup);
            by_category.insert(category.clone(), Arc::new(views));
        }

        Ok(Self {
            by_category,
            default_category: first.clone(),
        })
    }

    pub fn get(&self, category: &str) -> Result<Arc<PageViews>, DomainError> {
        self.by_category
            .get(category)
            .cloned()
            .ok_or_else(|| DomainError::not_found("category"))
    }

    /// Resolve `category`, falling back to the default content type.
    pub fn get_or_default(&self, category: Option<&str>) -> Result<Arc<PageViews>, DomainError> {
        self.get(category.unwrap_or(&self.default_category))
    }

    pub fn default_category(&self) -> &str {
        &self.default_category
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> + '_ {
        self.by_category.keys().map(String::as_str)
    }
}
