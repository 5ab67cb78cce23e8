//! Bus-wide counters and the snapshot handed to monitoring.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct BusCounters {
    pub(crate) events_published: AtomicU64,
    pub(crate) total_deliveries: AtomicU64,
    pub(crate) events_dropped: AtomicU64,
    pub(crate) publishes_rejected: AtomicU64,
    pub(crate) subscriptions_created: AtomicU64,
    pub(crate) subscriptions_cleaned: AtomicU64,
}

impl BusCounters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, active_subscriptions: usize, is_running: bool) -> BusStats {
        BusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            subscriptions_created: self.subscriptions_created.load(Ordering::Relaxed),
            subscriptions_cleaned: self.subscriptions_cleaned.load(Ordering::Relaxed),
            total_deliveries: self.total_deliveries.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            publishes_rejected: self.publishes_rejected.load(Ordering::Relaxed),
            active_subscriptions,
            is_running,
        }
    }
}

/// Point-in-time statistics.
///
/// Fields are read independently, so a snapshot taken while publishes are in
/// flight may be off by a few between fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Publish calls accepted while running.
    pub events_published: u64,
    /// Subscriptions ever created.
    pub subscriptions_created: u64,
    /// Subscriptions removed, by any path.
    pub subscriptions_cleaned: u64,
    /// Successful enqueues across all subscriptions.
    pub total_deliveries: u64,
    /// Matching deliveries lost to full queues.
    pub events_dropped: u64,
    /// Publish calls discarded because the bus was stopped.
    pub publishes_rejected: u64,
    /// Subscriptions currently registered.
    pub active_subscriptions: usize,
    /// Whether the bus is accepting publishes.
    pub is_running: bool,
}
