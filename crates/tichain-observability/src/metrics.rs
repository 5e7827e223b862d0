//! Prometheus metric name constants and safe registration helpers.
//!
//! Grounded on `dashflow-streaming::{metrics_constants,metrics_utils}`: a
//! multi-crate workspace can end up registering the same metric name more
//! than once (e.g. in tests, or when two components share a process), and
//! the `prometheus` `register_*!` macros panic on that. These helpers log
//! and reuse the existing metric instead.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::{Counter, Histogram, HistogramOpts};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// §7/§8: duplicate batch detected by the idempotency store (scenario S2).
pub const METRIC_DUPLICATE_BATCHES_TOTAL: &str = "tichain_duplicate_batches_total";
/// §7: a permanent/non-retryable error (poison message or rejected write).
pub const METRIC_NONRETRYABLE_ERRORS_TOTAL: &str = "tichain_nonretryable_errors_total";
/// §4.11: gaps the recovery controller has driven to `recovered`.
pub const METRIC_RECOVERED_GAPS_TOTAL: &str = "tichain_recovered_gaps_total";
/// §8 property 2: chain gaps detected by consumer-side `Validate`.
pub const METRIC_CHAIN_GAPS_DETECTED_TOTAL: &str = "tichain_chain_gaps_detected_total";
/// §4.8(b), §8 property 8: non-finite values dropped before write.
pub const METRIC_NONFINITE_VALUES_TOTAL: &str = "tichain_nonfinite_values_total";
/// §4.10: transient errors that triggered a backoff-and-retry.
pub const METRIC_TRANSIENT_RETRIES_TOTAL: &str = "tichain_transient_retries_total";
/// Consume-to-commit latency for the ingestion pipeline's processing loop.
pub const METRIC_BATCH_PROCESSING_SECONDS: &str = "tichain_batch_processing_seconds";

static COUNTERS: LazyLock<DashMap<String, Counter>> = LazyLock::new(DashMap::new);
static HISTOGRAMS: LazyLock<DashMap<String, Histogram>> = LazyLock::new(DashMap::new);

/// Returns the named counter, registering it with the default Prometheus
/// registry on first use and reusing it on every subsequent call.
pub fn counter(name: &str, help: &str) -> Counter {
    match COUNTERS.entry(name.to_string()) {
        Entry::Occupied(entry) => entry.get().clone(),
        Entry::Vacant(entry) => {
            let metric = Counter::new(name, help).unwrap_or_else(|e| {
                warn!(metric = name, error = %e, "failed to create counter");
                Counter::new(format!("{name}_invalid"), help).expect("fallback counter name is valid")
            });
            if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
                match e {
                    prometheus::Error::AlreadyReg => {
                        debug!(metric = name, "counter already registered; continuing");
                    }
                    other => warn!(metric = name, error = %other, "counter registration failed"),
                }
            }
            entry.insert(metric.clone());
            metric
        }
    }
}

pub fn histogram(opts: HistogramOpts) -> Histogram {
    let name = opts.common_opts.name.clone();
    match HISTOGRAMS.entry(name.clone()) {
        Entry::Occupied(entry) => entry.get().clone(),
        Entry::Vacant(entry) => {
            let metric = Histogram::with_opts(opts).unwrap_or_else(|e| {
                warn!(metric = %name, error = %e, "failed to create histogram");
                Histogram::with_opts(HistogramOpts::new(format!("{name}_invalid"), "invalid histogram"))
                    .expect("fallback histogram is valid")
            });
            if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
                match e {
                    prometheus::Error::AlreadyReg => {
                        debug!(metric = %name, "histogram already registered; continuing");
                    }
                    other => warn!(metric = %name, error = %other, "histogram registration failed"),
                }
            }
            entry.insert(metric.clone());
            metric
        }
    }
}

/// The fixed set of pipeline-facing counters (spec §7, §8), created once
/// and shared by every worker in the process.
pub struct PipelineMetrics {
    pub duplicate_batches_total: Counter,
    pub nonretryable_errors_total: Counter,
    pub recovered_gaps_total: Counter,
    pub chain_gaps_detected_total: Counter,
    pub nonfinite_values_total: Counter,
    pub transient_retries_total: Counter,
    pub batch_processing_seconds: Histogram,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            duplicate_batches_total: counter(
                METRIC_DUPLICATE_BATCHES_TOTAL,
                "Total batches skipped because the idempotency store had already seen them",
            ),
            nonretryable_errors_total: counter(
                METRIC_NONRETRYABLE_ERRORS_TOTAL,
                "Total permanent errors routed to the dead-letter queue",
            ),
            recovered_gaps_total: counter(
                METRIC_RECOVERED_GAPS_TOTAL,
                "Total chain gaps driven to the recovered state",
            ),
            chain_gaps_detected_total: counter(
                METRIC_CHAIN_GAPS_DETECTED_TOTAL,
                "Total chain gaps detected by consumer-side chain validation",
            ),
            nonfinite_values_total: counter(
                METRIC_NONFINITE_VALUES_TOTAL,
                "Total non-finite point values dropped before write",
            ),
            transient_retries_total: counter(
                METRIC_TRANSIENT_RETRIES_TOTAL,
                "Total transient errors that triggered a backoff-and-retry",
            ),
            batch_processing_seconds: histogram(HistogramOpts::new(
                METRIC_BATCH_PROCESSING_SECONDS,
                "Time from consume to commit for one batch",
            )),
        }
    }
}

impl PipelineMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_the_same_counter_twice_reuses_it() {
        let a = counter("tichain_test_counter_total", "test");
        let b = counter("tichain_test_counter_total", "test");
        a.inc();
        assert_eq!(b.get(), 1.0);
    }
}
