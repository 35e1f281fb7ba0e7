use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::render::{
    METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL, METRIC_CACHE_WRITE_FAILED_TOTAL,
    METRIC_COALESCED_WAIT_TOTAL, METRIC_RATE_LIMITED_TOTAL, METRIC_RENDER_DETACHED_TOTAL,
    METRIC_RENDER_FAILED_TOTAL, METRIC_RENDER_MS, METRIC_RENDER_TOTAL,
};
use crate::cache::METRIC_CACHE_EVICT_TOTAL;
use crate::config::{LogFormat, LoggingSettings};

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
            "Requests answered from the response cache."
        );
        describe_counter!(
            METRIC_CACHE_MISS_TOTAL,
            Unit::Count,
            "Requests that found no cached render and claimed a new one."
        );
        describe_counter!(
            METRIC_CACHE_EVICT_TOTAL,
            Unit::Count,
            "Entries evicted from the in-memory cache due to capacity."
        );
        describe_counter!(
            METRIC_CACHE_WRITE_FAILED_TOTAL,
            Unit::Count,
            "Renders that could not be written to the cache."
        );
        describe_counter!(
            METRIC_RENDER_TOTAL,
            Unit::Count,
            "Renders that completed successfully."
        );
        describe_counter!(
            METRIC_RENDER_FAILED_TOTAL,
            Unit::Count,
            "Renders that failed in fetch or conversion."
        );
        describe_counter!(
            METRIC_RENDER_DETACHED_TOTAL,
            Unit::Count,
            "Requests answered with 202 while their render kept running."
        );
        describe_counter!(
            METRIC_COALESCED_WAIT_TOTAL,
            Unit::Count,
            "Waits on another request's in-flight render of the same resource."
        );
        describe_counter!(
            METRIC_RATE_LIMITED_TOTAL,
            Unit::Count,
            "Requests rejected by the per-visitor rate limit."
        );
        describe_histogram!(
            METRIC_RENDER_MS,
            Unit::Milliseconds,
            "Fetch + render latency in milliseconds."
        );
    });
}
