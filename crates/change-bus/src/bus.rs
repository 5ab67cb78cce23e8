//! # Change Bus
//!
//! The broker. Owns the subscription registry, fans published events out to
//! matching subscriptions, and runs the reaper that reclaims subscriptions
//! whose consumer disappeared without dropping its stream.
//!
//! ## Registry
//!
//! ```text
//!             ┌───────────────────────────────┐
//!             │ entries: id → SubscriptionEntry│
//!             └───────────────────────────────┘
//!   global ───► {id, id, ...}        (Interest::All)
//!   by_kind ──► Created  → {id, ...} (Interest::Kinds)
//!               Updated  → {id, ...}
//!               ...
//! ```
//!
//! One `RwLock` guards the whole registry: `publish` takes the read side,
//! registration changes take the write side. Queues are per-subscription
//! channels and never block the publisher.

use crate::config::{BusConfig, ConfigError};
use crate::event::{ChangeEvent, EventKind};
use crate::feeds::Feed;
use crate::filter::{ChangeFilter, FilterCriteria};
use crate::publisher::EventPublisher;
use crate::stats::{BusCounters, BusStats};
use crate::subscription::{
    Delivery, EventStream, Interest, SubscriptionEntry, SubscriptionId, SubscriptionInfo,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Why a subscription left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Unsubscribed,
    StreamDropped,
    Idle,
    Shutdown,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<SubscriptionId, SubscriptionEntry>,
    global: HashSet<SubscriptionId>,
    by_kind: HashMap<EventKind, HashSet<SubscriptionId>>,
}

impl Registry {
    fn insert(&mut self, entry: SubscriptionEntry) {
        match &entry.interest {
            Interest::All => {
                self.global.insert(entry.id);
            }
            Interest::Kinds(kinds) => {
                for kind in kinds {
                    self.by_kind.entry(*kind).or_default().insert(entry.id);
                }
            }
        }
        self.entries.insert(entry.id, entry);
    }

    fn remove(&mut self, id: SubscriptionId) -> Option<SubscriptionEntry> {
        let entry = self.entries.remove(&id)?;
        match &entry.interest {
            Interest::All => {
                self.global.remove(&id);
            }
            Interest::Kinds(kinds) => {
                for kind in kinds {
                    if let Some(bucket) = self.by_kind.get_mut(kind) {
                        bucket.remove(&id);
                        if bucket.is_empty() {
                            self.by_kind.remove(kind);
                        }
                    }
                }
            }
        }
        Some(entry)
    }

    /// Global bucket plus the bucket for `kind`, each subscription at most
    /// once.
    fn candidates(&self, kind: EventKind) -> impl Iterator<Item = &SubscriptionEntry> + '_ {
        let by_kind = self
            .by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|id| !self.global.contains(*id));

        self.global
            .iter()
            .chain(by_kind)
            .filter_map(|id| self.entries.get(id))
    }

    fn idle_ids(&self, now: Instant, threshold: Duration) -> Vec<SubscriptionId> {
        self.entries
            .values()
            .filter(|entry| entry.liveness.idle_for(now) > threshold)
            .map(|entry| entry.id)
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct ReaperHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub(crate) struct BusInner {
    config: BusConfig,
    registry: RwLock<Registry>,
    running: AtomicBool,
    reaper: Mutex<Option<ReaperHandle>>,
    counters: BusCounters,
}

impl BusInner {
    fn publish(&self, event: Arc<ChangeEvent>) -> usize {
        if !self.running.load(Ordering::Acquire) {
            BusCounters::add(&self.counters.publishes_rejected, 1);
            warn!(
                event_id = %event.id(),
                kind = %event.kind(),
                "Change bus not running, event dropped"
            );
            return 0;
        }

        let mut delivered = 0usize;
        let mut dropped = 0u64;
        {
            let registry = self.registry.read();
            for entry in registry.candidates(event.kind()) {
                if !entry.criteria.matches(&event) {
                    continue;
                }
                match entry.try_deliver(Arc::clone(&event)) {
                    Delivery::Enqueued => delivered += 1,
                    Delivery::QueueFull => {
                        dropped += 1;
                        warn!(
                            subscription_id = %entry.id,
                            event_id = %event.id(),
                            "Queue full for subscription, dropping event"
                        );
                    }
                    // Receiver is mid-drop; its Drop impl unregisters it.
                    Delivery::Closed => {}
                }
            }
        }

        BusCounters::add(&self.counters.events_published, 1);
        BusCounters::add(&self.counters.total_deliveries, delivered as u64);
        if dropped > 0 {
            BusCounters::add(&self.counters.events_dropped, dropped);
        }

        debug!(
            event_id = %event.id(),
            kind = %event.kind(),
            delivered,
            dropped,
            "Event published"
        );
        delivered
    }

    /// Unregister one subscription. The entry, and with it the queue's
    /// sending half, is dropped after the registry lock is released.
    pub(crate) fn remove(&self, id: SubscriptionId, reason: Removal) -> bool {
        let removed = self.registry.write().remove(id);
        let Some(entry) = removed else {
            return false;
        };

        entry.liveness.close();
        drop(entry);
        BusCounters::add(&self.counters.subscriptions_cleaned, 1);
        debug!(subscription_id = %id, reason = ?reason, "Subscription removed");
        true
    }

    fn remove_all(&self, reason: Removal) -> usize {
        let ids: Vec<SubscriptionId> = self.registry.read().entries.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.remove(*id, reason))
            .count()
    }

    /// One reaper pass: remove every subscription idle past the threshold.
    fn reap_idle(&self, now: Instant) -> usize {
        let idle = self
            .registry
            .read()
            .idle_ids(now, self.config.idle_threshold());

        idle.into_iter()
            .filter(|id| self.remove(*id, Removal::Idle))
            .count()
    }
}

/// In-process change-event broadcaster.
///
/// Cheap to clone; all clones share one registry. Construct one per process
/// at startup, call [`start`](Self::start), hand clones to the mutation and
/// subscription layers, and call [`stop`](Self::stop) on shutdown.
#[derive(Clone)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

impl ChangeBus {
    /// Create a stopped bus with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::from_valid_config(BusConfig::default())
    }

    /// Create a stopped bus with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns the validation error if `config` is unusable.
    pub fn with_config(config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                config,
                registry: RwLock::new(Registry::default()),
                running: AtomicBool::new(false),
                reaper: Mutex::new(None),
                counters: BusCounters::default(),
            }),
        }
    }

    /// Start accepting publishes and spawn the reaper. No-op if running.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(&self) {
        let mut slot = self.inner.reaper.lock();
        if self.inner.running.load(Ordering::Acquire) {
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_reaper(
            Arc::downgrade(&self.inner),
            self.inner.config.cleanup_interval,
            shutdown_rx,
        ));
        *slot = Some(ReaperHandle { shutdown, task });
        self.inner.running.store(true, Ordering::Release);

        info!(
            max_queue_size = self.inner.config.max_queue_size,
            cleanup_interval_secs = self.inner.config.cleanup_interval.as_secs(),
            "Change bus started"
        );
    }

    /// Stop the bus: cancel and await the reaper, then remove every
    /// subscription so all open streams end.
    ///
    /// Subscribing remains possible afterwards, but nothing is delivered
    /// until the bus is started again.
    pub async fn stop(&self) {
        let handle = {
            let mut slot = self.inner.reaper.lock();
            self.inner.running.store(false, Ordering::Release);
            slot.take()
        };

        if let Some(ReaperHandle { shutdown, task }) = handle {
            let _ = shutdown.send(());
            if let Err(e) = task.await {
                error!(error = %e, "Reaper task ended abnormally");
            }
        }

        let removed = self.inner.remove_all(Removal::Shutdown);
        info!(removed, "Change bus stopped");
    }

    /// Whether publishes are currently accepted.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Register a subscription.
    ///
    /// The subscription is placed in the global bucket for `Interest::All`,
    /// or in one bucket per kind otherwise. `criteria` is then checked for
    /// every routed event.
    ///
    /// Returns the new id and the stream that drains the subscription's
    /// queue. Dropping the stream unsubscribes.
    #[must_use]
    pub fn subscribe(
        &self,
        interest: Interest,
        criteria: FilterCriteria,
    ) -> (SubscriptionId, EventStream) {
        let (entry, stream) = SubscriptionEntry::open(
            interest,
            criteria,
            self.inner.config.max_queue_size,
            Arc::downgrade(&self.inner),
        );
        let id = entry.id;

        debug!(subscription_id = %id, interest = ?entry.interest, "New subscription created");
        self.inner.registry.write().insert(entry);
        BusCounters::add(&self.inner.counters.subscriptions_created, 1);

        (id, stream)
    }

    /// Subscribe to every event with no filter.
    #[must_use]
    pub fn subscribe_all(&self) -> (SubscriptionId, EventStream) {
        self.subscribe(Interest::All, FilterCriteria::any())
    }

    /// Subscribe to a named feed, optionally narrowed by a client filter.
    #[must_use]
    pub fn subscribe_feed(
        &self,
        feed: Feed,
        filter: Option<ChangeFilter>,
    ) -> (SubscriptionId, EventStream) {
        let criteria = feed.criteria(filter.map(ChangeFilter::into_criteria).unwrap_or_default());
        self.subscribe(feed.interest(), criteria)
    }

    /// Remove a subscription.
    ///
    /// Returns `false` if no subscription with that id is registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id, Removal::Unsubscribed)
    }

    /// Deliver `event` to every matching subscription without waiting.
    ///
    /// # Returns
    ///
    /// The number of subscriptions the event was enqueued to. Subscriptions
    /// whose queue is full miss the event; that is counted, not reported.
    /// Always 0 while the bus is stopped.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.inner.publish(Arc::new(event))
    }

    /// Like [`publish`](Self::publish), for an event the caller already
    /// shares.
    pub fn publish_shared(&self, event: Arc<ChangeEvent>) -> usize {
        self.inner.publish(event)
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let active = self.inner.registry.read().len();
        self.inner.counters.snapshot(active, self.is_running())
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Look up one subscription.
    #[must_use]
    pub fn subscription(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        let now = Instant::now();
        self.inner.registry.read().entries.get(&id).map(|e| e.info(now))
    }

    /// All registered subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let now = Instant::now();
        self.inner
            .registry
            .read()
            .entries
            .values()
            .map(|e| e.info(now))
            .collect()
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for ChangeBus {
    fn publish(&self, event: ChangeEvent) -> usize {
        ChangeBus::publish(self, event)
    }

    fn events_published(&self) -> u64 {
        self.inner
            .counters
            .events_published
            .load(Ordering::Relaxed)
    }
}

/// Background loop: every `interval`, reclaim idle subscriptions.
///
/// A panic inside one pass is caught and logged; the loop carries on with
/// the next tick. The loop exits on shutdown or once the bus is dropped.
async fn run_reaper(
    bus: Weak<BusInner>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let Some(inner) = bus.upgrade() else { break };
                match panic::catch_unwind(AssertUnwindSafe(|| inner.reap_idle(Instant::now()))) {
                    Ok(0) => {}
                    Ok(reclaimed) => info!(reclaimed, "Reclaimed idle subscriptions"),
                    Err(_) => error!("Reaper pass panicked, retrying next interval"),
                }
            }
        }
    }

    debug!("Reaper exited");
}
