use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// Metrics registry for the data-access layer.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    client: ClientMetrics,
    cache: CacheMetrics,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("skydash".into()), None)?);

        let client = ClientMetrics::register(&registry)?;
        let cache = CacheMetrics::register(&registry)?;

        Ok(Self {
            registry,
            client,
            cache,
        })
    }

    /// Count one endpoint attempt with its classified outcome.
    pub fn record_attempt(&self, endpoint: &str, outcome: &str, elapsed: Duration) {
        self.client
            .attempts_total
            .with_label_values(&[endpoint, outcome])
            .inc();
        self.client
            .attempt_duration
            .with_label_values(&[endpoint])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_request_failure(&self, kind: &str) {
        self.client
            .request_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Mark which endpoint is currently sticky (1) and clear the others (0).
    pub fn set_sticky(&self, endpoint: &str, all: &[&str]) {
        for candidate in all {
            self.client
                .sticky_endpoint
                .with_label_values(&[candidate])
                .set(if *candidate == endpoint { 1 } else { 0 });
        }
    }

    /// `result` is one of `hit`, `miss` or `rejected`.
    pub fn record_cache_lookup(&self, resource: &str, result: &str) {
        self.cache
            .lookups_total
            .with_label_values(&[resource, result])
            .inc();
    }

    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct ClientMetrics {
    attempts_total: IntCounterVec,
    attempt_duration: HistogramVec,
    request_failures_total: IntCounterVec,
    sticky_endpoint: IntGaugeVec,
}

impl ClientMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let attempts_total = IntCounterVec::new(
            Opts::new(
                "endpoint_attempts_total",
                "Endpoint attempts by classified outcome",
            ),
            &["endpoint", "outcome"],
        )?;
        registry.register(Box::new(attempts_total.clone()))?;

        let attempt_duration = HistogramVec::new(
            HistogramOpts::new("endpoint_attempt_seconds", "Single endpoint attempt duration"),
            &["endpoint"],
        )?;
        registry.register(Box::new(attempt_duration.clone()))?;

        let request_failures_total = IntCounterVec::new(
            Opts::new(
                "request_failures_total",
                "Logical requests that failed after failover",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(request_failures_total.clone()))?;

        let sticky_endpoint = IntGaugeVec::new(
            Opts::new(
                "sticky_endpoint",
                "Endpoint tried first on the next request (1=sticky)",
            ),
            &["endpoint"],
        )?;
        registry.register(Box::new(sticky_endpoint.clone()))?;

        Ok(Self {
            attempts_total,
            attempt_duration,
            request_failures_total,
            sticky_endpoint,
        })
    }
}

#[derive(Clone)]
struct CacheMetrics {
    lookups_total: IntCounterVec,
}

impl CacheMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let lookups_total = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Request cache lookups by cache and result"),
            &["resource", "result"],
        )?;
        registry.register(Box::new(lookups_total.clone()))?;

        Ok(Self { lookups_total })
    }
}
