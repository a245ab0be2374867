use backer_execution::Drained;
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Ledger counters exported on `/metrics`.
pub struct Metrics {
    registry: Registry,

    transfers_committed: Counter,
    transfers_failed: Counter,
    residual_queued: Counter,
    deltas_settled: Counter,
    pending: Gauge,

    /// Last [backer_execution::RetryQueue::enqueued] reading.
    queued_seen: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("backer");
        let transfers_committed = Counter::default();
        let transfers_failed = Counter::default();
        let residual_queued = Counter::default();
        let deltas_settled = Counter::default();
        let pending = Gauge::default();
        registry.register(
            "transfers_committed",
            "Multi-party transfers applied in full",
            transfers_committed.clone(),
        );
        registry.register(
            "transfers_failed",
            "Multi-party transfers rejected and reverted",
            transfers_failed.clone(),
        );
        registry.register(
            "residual_queued",
            "Residual funds handed to the retry queue",
            residual_queued.clone(),
        );
        registry.register(
            "deltas_settled",
            "Residual deltas applied by the retry worker",
            deltas_settled.clone(),
        );
        registry.register(
            "pending",
            "Residual funds waiting in the retry queue",
            pending.clone(),
        );

        Self {
            registry,
            transfers_committed,
            transfers_failed,
            residual_queued,
            deltas_settled,
            pending,
            queued_seen: AtomicU64::new(0),
        }
    }

    pub fn committed(&self) {
        self.transfers_committed.inc();
    }

    pub fn failed(&self) {
        self.transfers_failed.inc();
    }

    /// Catch `residual_queued` up with the queue's running total.
    ///
    /// Readings may arrive out of order; only growth past the highest one
    /// seen is counted.
    pub fn queued(&self, total: u64) {
        let seen = self.queued_seen.fetch_max(total, Ordering::Relaxed);
        if total > seen {
            self.residual_queued.inc_by(total - seen);
        }
    }

    pub fn drained(&self, drained: &Drained) {
        self.deltas_settled.inc_by(drained.settled as u64);
        self.pending.set(drained.remaining as i64);
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending.set(pending as i64);
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}
