//! Degradation counters shared by retrieval nodes.
//!
//! One [`DegradationMonitor`] is constructed per process (or per test) and
//! handed to every node that can degrade. Individual degradations log at
//! `debug`; the aggregate error fires once each time the count crosses a
//! multiple of the threshold.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Default number of degradations between aggregate alerts.
pub const DEFAULT_ALERT_THRESHOLD: u64 = 10;

/// Atomic count of degraded results.
#[derive(Debug)]
pub struct DegradationMonitor {
    count: AtomicU64,
    threshold: u64,
}

/// Point-in-time view of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DegradationSnapshot {
    pub count: u64,
    pub threshold: u64,
    pub alerts: u64,
}

impl DegradationMonitor {
    /// A threshold of zero disables aggregate alerts.
    pub fn new(threshold: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            threshold,
        }
    }

    /// Record one degradation and return the running total.
    pub fn record(&self, node: &str, reason: &str) -> u64 {
        let total = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(node, reason, total, "Degraded result returned");

        if self.threshold > 0 && total % self.threshold == 0 {
            tracing::error!(
                total,
                threshold = self.threshold,
                last_reason = reason,
                "Retrieval keeps degrading; check the embedding and vector services"
            );
        }
        total
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn snapshot(&self) -> DegradationSnapshot {
        let count = self.count();
        DegradationSnapshot {
            count,
            threshold: self.threshold,
            alerts: count.checked_div(self.threshold).unwrap_or(0),
        }
    }
}

impl Default for DegradationMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_THRESHOLD)
    }
}
