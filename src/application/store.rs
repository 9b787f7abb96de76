//! Key-value store port used by the view counters.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use thiserror::Error;
use tracing::warn;

const METRIC_STORE_ERRORS: &str = "pageviews_store_errors_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store operation timed out")]
    Timeout,
    #[error("store command failed: {0}")]
    Command(String),
    #[error("value at `{key}` is not an integer")]
    NotAnInteger { key: String },
}

impl StoreError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }

    pub fn command(err: impl std::fmt::Display) -> Self {
        Self::Command(err.to_string())
    }

    /// Short label for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "connection",
            StoreError::Timeout => "timeout",
            StoreError::Command(_) => "command",
            StoreError::NotAnInteger { .. } => "not_an_integer",
        }
    }
}

/// Shared store holding one counter per content item.
///
/// Implementations must be safe for concurrent use by many requests and
/// `increment` must be atomic per key.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Raw value at `key`, `None` when unset.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Values for all `keys` in one round trip, in input order.
    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError>;

    /// Atomically add one to the integer at `key` (starting from zero) and
    /// return the new value.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;

    /// Write `value` with an expiry unless `key` already exists. Returns
    /// `true` when this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Release the underlying connection. Later calls may reconnect.
    async fn close(&self) {}
}

/// Count and log a store failure that the caller is about to degrade.
pub(crate) fn note_store_error(op: &'static str, err: &StoreError) {
    counter!(METRIC_STORE_ERRORS, "op" => op, "kind" => err.kind()).increment(1);
    warn!(
        target: "pageviews::store",
        op,
        kind = err.kind(),
        error = %err,
        "Store operation failed; degrading"
    );
}
