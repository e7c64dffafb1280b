//! Sync engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for activation, save and heartbeat activity since startup.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Activations that acquired a lease and applied state
    pub activations: AtomicU64,
    /// Activations that skipped sync because of a blacklist
    pub bypassed: AtomicU64,
    /// Activations refused with a user-visible reason
    pub denials: AtomicU64,
    /// Successful save-and-release calls
    pub saves: AtomicU64,
    /// Saves rejected because the lease had already moved
    pub lease_lost: AtomicU64,
    /// Saves abandoned after an encode or store failure
    pub save_failures: AtomicU64,
    /// Plain releases issued after a failed save
    pub fallback_releases: AtomicU64,
    /// Deactivations dropped by the single-flight guard or a prior handoff
    pub deduplicated: AtomicU64,
    /// Handoff messages acted on
    pub handoffs: AtomicU64,
    /// Successful heartbeat renewals
    pub renewals: AtomicU64,
    /// Heartbeat renewals that hit a store error
    pub renewal_errors: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            activations: self.activations.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            denials: self.denials.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            lease_lost: self.lease_lost.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            fallback_releases: self.fallback_releases.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            renewal_errors: self.renewal_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sync metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncMetricsSnapshot {
    pub activations: u64,
    pub bypassed: u64,
    pub denials: u64,
    pub saves: u64,
    pub lease_lost: u64,
    pub save_failures: u64,
    pub fallback_releases: u64,
    pub deduplicated: u64,
    pub handoffs: u64,
    pub renewals: u64,
    pub renewal_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = SyncMetrics::new();
        SyncMetrics::incr(&metrics.saves);
        SyncMetrics::incr(&metrics.saves);
        SyncMetrics::incr(&metrics.denials);
        let snap = metrics.snapshot();
        assert_eq!(snap.saves, 2);
        assert_eq!(snap.denials, 1);
        assert_eq!(snap.activations, 0);
    }
}
