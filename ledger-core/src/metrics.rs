//! Metrics collection for observability
//!
//! Each ledger instance owns its own Prometheus registry so several ledgers
//! can live in one process (tests, embedded nodes).
//!
//! # Metrics
//!
//! - `ledger_transactions_committed_total` - Transactions applied to world state
//! - `ledger_transactions_failed_total` - Transactions rejected by the contract, by error type
//! - `ledger_events_emitted_total` - Event records flushed in notifications
//! - `ledger_commit_duration_seconds` - Histogram of execute + commit latency

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transactions
    pub transactions_committed: IntCounter,

    /// Failed transactions by error type
    pub transactions_failed: IntCounterVec,

    /// Event records emitted
    pub events_emitted: IntCounter,

    /// Execute + commit duration histogram
    pub commit_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_committed = IntCounter::new(
            "ledger_transactions_committed_total",
            "Transactions applied to world state",
        )?;
        registry.register(Box::new(transactions_committed.clone()))?;

        let transactions_failed = IntCounterVec::new(
            Opts::new(
                "ledger_transactions_failed_total",
                "Transactions rejected by the contract",
            ),
            &["error_type"],
        )?;
        registry.register(Box::new(transactions_failed.clone()))?;

        let events_emitted = IntCounter::new(
            "ledger_events_emitted_total",
            "Event records flushed in notifications",
        )?;
        registry.register(Box::new(events_emitted.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of execute + commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        Ok(Self {
            transactions_committed,
            transactions_failed,
            events_emitted,
            commit_duration,
            registry,
        })
    }

    /// Record a committed transaction and the records it flushed
    pub fn record_commit(&self, event_count: usize, duration_seconds: f64) {
        self.transactions_committed.inc();
        self.events_emitted.inc_by(event_count as u64);
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a rejected transaction
    pub fn record_failure(&self, error_type: &str) {
        self.transactions_failed
            .with_label_values(&[error_type])
            .inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.transactions_committed.get(), 0);
        assert_eq!(metrics.events_emitted.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_commit(3, 0.002);
        assert_eq!(a.transactions_committed.get(), 1);
        assert_eq!(a.events_emitted.get(), 3);
        assert_eq!(b.transactions_committed.get(), 0);
    }

    #[test]
    fn test_record_failure() {
        let metrics = Metrics::new().unwrap();
        metrics.record_failure("validation");
        metrics.record_failure("validation");
        assert_eq!(
            metrics
                .transactions_failed
                .with_label_values(&["validation"])
                .get(),
            2
        );
    }
}
