//! Prometheus metrics for the fan-out path
//!
//! Exposed on `/metrics` by the HTTP layer.

use std::sync::LazyLock;

use crate::models::Platform;

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Encoder, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Currently registered subscribers
pub static SUBSCRIBERS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "feedwall_subscribers",
        "Current number of registered subscribers",
        REGISTRY.clone()
    )
    .expect("Failed to register SUBSCRIBERS")
});

/// Events handed to a subscriber channel
pub static EVENTS_BROADCAST: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "feedwall_events_broadcast_total",
        "Events delivered to subscriber channels",
        &["platform"],
        REGISTRY.clone()
    )
    .expect("Failed to register EVENTS_BROADCAST")
});

/// Events dropped because a subscriber channel was full
pub static EVENTS_DROPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "feedwall_events_dropped_total",
        "Events dropped for slow subscribers",
        &["platform"],
        REGISTRY.clone()
    )
    .expect("Failed to register EVENTS_DROPPED")
});

/// Stream items discarded by the reshare filter
pub static RESHARES_FILTERED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        "feedwall_reshares_filtered_total",
        "Reshares discarded while reshare display is off",
        REGISTRY.clone()
    )
    .expect("Failed to register RESHARES_FILTERED")
});

/// Upstream reconnects caused by a filter change
pub static UPSTREAM_RESTARTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "feedwall_upstream_restarts_total",
        "Upstream restarts requested by a configuration change",
        &["platform"],
        REGISTRY.clone()
    )
    .expect("Failed to register UPSTREAM_RESTARTS")
});

/// Failed upstream connect attempts
pub static UPSTREAM_CONNECT_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        "feedwall_upstream_connect_failures_total",
        "Failed upstream connect attempts",
        &["platform"],
        REGISTRY.clone()
    )
    .expect("Failed to register UPSTREAM_CONNECT_FAILURES")
});

/// Register every metric and create the per-platform series, so a scrape
/// lists them at zero before the first event.
pub fn init_metrics() {
    LazyLock::force(&SUBSCRIBERS);
    LazyLock::force(&RESHARES_FILTERED);
    for platform in [Platform::Chat, Platform::Stream] {
        let label = [platform.as_str()];
        EVENTS_BROADCAST.with_label_values(&label);
        EVENTS_DROPPED.with_label_values(&label);
        UPSTREAM_RESTARTS.with_label_values(&label);
        UPSTREAM_CONNECT_FAILURES.with_label_values(&label);
    }
}

/// Render every registered metric in the Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_exposes_every_metric() {
        init_metrics();

        let output = gather_metrics().unwrap();
        for name in [
            "feedwall_subscribers",
            "feedwall_events_broadcast_total",
            "feedwall_events_dropped_total",
            "feedwall_reshares_filtered_total",
            "feedwall_upstream_restarts_total",
            "feedwall_upstream_connect_failures_total",
        ] {
            assert!(output.contains(name), "{name} missing");
        }
        assert!(output.contains("feedwall_upstream_connect_failures_total{platform=\"twitter\"}"));
    }

    #[test]
    fn test_metrics_registration() {
        EVENTS_BROADCAST.with_label_values(&["twitch"]).inc();
        RESHARES_FILTERED.inc();

        let output = gather_metrics().unwrap();
        assert!(output.contains("feedwall_events_broadcast_total"));
        assert!(output.contains("feedwall_reshares_filtered_total"));
    }
}
