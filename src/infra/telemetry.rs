use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::render::{
        METRIC_CACHE_COALESCED_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
        METRIC_CACHE_READ_ERROR_TOTAL, METRIC_CACHE_STORE_ERROR_TOTAL, METRIC_UPSTREAM_ERROR_TOTAL,
        METRIC_UPSTREAM_FETCH_MS,
    },
    cache::METRIC_CACHE_EVICTED_TOTAL,
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
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
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_CACHE_HIT_TOTAL,
            Unit::Count,
            "Total number of requests served from the blob store."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Total number of requests that had to go upstream."
        );
        describe_counter!(
            METRIC_CACHE_COALESCED_TOTAL,
            Unit::Count,
            "Total number of misses that joined an in-flight upstream fetch."
        );
        describe_counter!(
            METRIC_CACHE_READ_ERROR_TOTAL,
            Unit::Count,
            "Total number of blob reads that failed and fell back to upstream."
        );
        describe_counter!(
            METRIC_CACHE_STORE_ERROR_TOTAL,
            Unit::Count,
            "Total number of fetched artifacts that could not be persisted."
        );
        describe_counter!(
            METRIC_UPSTREAM_ERROR_TOTAL,
            Unit::Count,
            "Total number of failed upstream render calls."
        );
        describe_counter!(
            METRIC_CACHE_EVICTED_TOTAL,
            Unit::Count,
            "Total number of blobs removed by eviction sweeps."
        );
        describe_histogram!(
            METRIC_UPSTREAM_FETCH_MS,
            Unit::Milliseconds,
            "Upstream render latency in milliseconds."
        );
    });
}
