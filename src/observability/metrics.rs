use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::{Arc, OnceLock};
use tracing::info;

// Declare the static OnceLock to hold the Metrics.
static METRICS_INSTANCE: OnceLock<Arc<Metrics>> = OnceLock::new();

/// Initializes on first use and gets a reference to the process-wide `Metrics`.
///
/// Synchronous so it can be used from timer callbacks and lock-holding code.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE.get_or_init(|| {
        info!("Initializing Metrics ...");
        Metrics::new()
    })
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Fetch metrics
    pub fetch_requests: IntCounterVec,
    pub fetch_attempts: IntCounter,
    pub fetch_failures: IntCounterVec,
    pub fetch_duration: HistogramVec,
    pub background_refresh_fallbacks: IntCounter,

    // Cache metrics
    pub cached_keys: IntGauge,
    pub earliest_token_expiry_unix: IntGauge,

    // Config/runtime
    pub config_parse_failures: IntCounter,
    pub config_validation_errors: IntCounter,
    pub up: IntGauge,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("sessiontoken".into()), None)
            .expect("valid metrics prefix");

        let metrics: Arc<Metrics> = Arc::new(Self {
            // Fetch
            fetch_requests: IntCounterVec::new(Opts::new("fetch_requests_total", "Token fetches started, by mode"), &["mode"]).expect("metric"),
            fetch_attempts: IntCounter::new("fetch_attempts_total", "Individual fetcher invocations, retries included").expect("metric"),
            fetch_failures: IntCounterVec::new(Opts::new("fetch_failures_total", "Terminal fetch failures by mode and reason"), &["mode", "reason"]).expect("metric"),
            fetch_duration: HistogramVec::new(HistogramOpts::new("fetch_duration_seconds", "Fetch duration seconds, retries included").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 30.0, 120.0]), &["mode"]).expect("metric"),
            background_refresh_fallbacks: IntCounter::new("background_refresh_fallbacks_total", "Background refreshes that failed and kept the previous token").expect("metric"),

            // Cache
            cached_keys: IntGauge::new("cached_keys", "Cache keys currently tracked").expect("metric"),
            earliest_token_expiry_unix: IntGauge::new("earliest_token_expiry_unix_seconds", "Soonest expiry among cached tokens, 0 when none").expect("metric"),

            // Config/runtime
            config_parse_failures: IntCounter::new("config_parse_failures_total", "Config files that failed to parse").expect("metric"),
            config_validation_errors: IntCounter::new("config_validation_errors_total", "Validation errors during startup").expect("metric"),
            up: IntGauge::new("up", "1 if service is healthy").expect("metric"),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(metrics.fetch_requests.clone()),
            Box::new(metrics.fetch_attempts.clone()),
            Box::new(metrics.fetch_failures.clone()),
            Box::new(metrics.fetch_duration.clone()),
            Box::new(metrics.background_refresh_fallbacks.clone()),
            Box::new(metrics.cached_keys.clone()),
            Box::new(metrics.earliest_token_expiry_unix.clone()),
            Box::new(metrics.config_parse_failures.clone()),
            Box::new(metrics.config_validation_errors.clone()),
            Box::new(metrics.up.clone()),
        ];
        for collector in collectors {
            reg.register(collector).expect("metric registered once");
        }

        metrics
    }
}
