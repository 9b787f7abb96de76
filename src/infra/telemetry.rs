use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
/// Events go to stderr so command output on stdout stays machine-readable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions with whatever recorder is installed.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pageviews_recorded_total",
            Unit::Count,
            "Total number of views written to a counter."
        );
        describe_counter!(
            "pageviews_suppressed_total",
            Unit::Count,
            "Total number of repeat views suppressed by deduplication."
        );
        describe_counter!(
            "pageviews_store_errors_total",
            Unit::Count,
            "Total number of failed store operations, by operation and kind."
        );
        describe_counter!(
            "pageviews_invalid_value_total",
            Unit::Count,
            "Total number of stored counter values that were not non-negative integers."
        );
        describe_counter!(
            "pageviews_cache_hit_total",
            Unit::Count,
            "Total number of count reads served inside the revalidation window."
        );
        describe_counter!(
            "pageviews_cache_miss_total",
            Unit::Count,
            "Total number of count reads that went to the store."
        );
        describe_histogram!(
            "pageviews_batch_get_ms",
            Unit::Milliseconds,
            "Batched counter read latency in milliseconds."
        );
    });
}
