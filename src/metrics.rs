//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub transactions_prepared: IntCounter,
    pub transactions_rejected: IntCounter,
    pub transactions_submitted: IntCounter,
    pub decode_failures: IntCounter,
    pub scan_accounts_skipped: IntCounter,
    pub stats_retries: IntCounter,

    // Histograms
    pub rpc_latency: Histogram,
    pub build_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let transactions_prepared = IntCounter::with_opts(Opts::new(
            "transactions_prepared_total",
            "Unsigned stake transactions handed back to the caller",
        ))?;

        let transactions_rejected = IntCounter::with_opts(Opts::new(
            "transactions_rejected_total",
            "Stake operations refused before a transaction was built",
        ))?;

        let transactions_submitted = IntCounter::with_opts(Opts::new(
            "transactions_submitted_total",
            "Signed transactions relayed to the cluster",
        ))?;

        let decode_failures = IntCounter::with_opts(Opts::new(
            "decode_failures_total",
            "Stake account payloads that failed to decode",
        ))?;

        let scan_accounts_skipped = IntCounter::with_opts(Opts::new(
            "scan_accounts_skipped_total",
            "Accounts skipped while scanning the stake program",
        ))?;

        let stats_retries = IntCounter::with_opts(Opts::new(
            "stats_retries_total",
            "Retried requests against the validator stats service",
        ))?;

        let rpc_latency = Histogram::with_opts(
            HistogramOpts::new("rpc_latency_seconds", "RPC call latency")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;

        let build_latency = Histogram::with_opts(
            HistogramOpts::new("build_latency_seconds", "Transaction build latency")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;

        registry.register(Box::new(transactions_prepared.clone()))?;
        registry.register(Box::new(transactions_rejected.clone()))?;
        registry.register(Box::new(transactions_submitted.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(scan_accounts_skipped.clone()))?;
        registry.register(Box::new(stats_retries.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;
        registry.register(Box::new(build_latency.clone()))?;

        Ok(Self {
            registry,
            transactions_prepared,
            transactions_rejected,
            transactions_submitted,
            decode_failures,
            scan_accounts_skipped,
            stats_retries,
            rpc_latency,
            build_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Record the elapsed time into `histogram`.
    pub fn observe_duration(self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let m = Metrics::new().unwrap();
        m.transactions_prepared.inc();
        m.decode_failures.inc_by(2);

        let text = m.render().unwrap();
        assert!(text.contains("transactions_prepared_total 1"));
        assert!(text.contains("decode_failures_total 2"));
    }

    #[test]
    fn test_timer_observes_histogram() {
        let m = Metrics::new().unwrap();
        Timer::new().observe_duration(&m.build_latency);
        assert_eq!(m.build_latency.get_sample_count(), 1);
    }
}
