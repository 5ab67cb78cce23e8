//! # Subscriptions
//!
//! A subscription pairs a bounded delivery queue with its filter and
//! liveness bookkeeping. The bus keeps the sending half in its registry; the
//! consumer owns the receiving half as an [`EventStream`].
//!
//! Dropping an `EventStream` is the consumer's cancellation signal: the
//! subscription is unregistered and its queue released immediately.

use crate::bus::{BusInner, Removal};
use crate::event::{ChangeEvent, EventKind};
use crate::filter::FilterCriteria;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio::time::Instant;
use tokio_stream::Stream;
use uuid::Uuid;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscription was removed from the bus.
    #[error("Subscription closed")]
    Closed,
}

/// Unique subscription identifier. Freshly generated per subscribe call and
/// never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which registry buckets a subscription lives in.
///
/// This is the coarse routing decision; `FilterCriteria` is applied on top
/// of it for every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interest {
    /// The global bucket: every kind.
    #[default]
    All,
    /// One bucket per listed kind.
    Kinds(BTreeSet<EventKind>),
}

impl Interest {
    /// Interest in the given kinds.
    #[must_use]
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self::Kinds(kinds.into_iter().collect())
    }

    /// Interest in a single kind.
    #[must_use]
    pub fn only(kind: EventKind) -> Self {
        Self::kinds([kind])
    }

    /// `None` means every kind.
    #[must_use]
    pub fn from_optional(kinds: Option<Vec<EventKind>>) -> Self {
        kinds.map_or(Self::All, Self::kinds)
    }

    /// Whether events of `kind` are routed to this interest.
    #[must_use]
    pub fn includes(&self, kind: EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Kinds(kinds) => kinds.contains(&kind),
        }
    }
}

/// Activity bookkeeping shared by the registry entry and the stream.
#[derive(Debug)]
pub(crate) struct Liveness {
    created_at: DateTime<Utc>,
    origin: Instant,
    /// Milliseconds after `origin` of the last delivery or pull.
    last_activity_ms: AtomicU64,
    missed: AtomicU64,
    closed: AtomicBool,
}

impl Liveness {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            missed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        let last = self.origin + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }
}

/// Outcome of a single non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Enqueued,
    QueueFull,
    Closed,
}

/// Registry-side half of a subscription.
pub(crate) struct SubscriptionEntry {
    pub(crate) id: SubscriptionId,
    pub(crate) interest: Interest,
    pub(crate) criteria: FilterCriteria,
    sender: mpsc::Sender<Arc<ChangeEvent>>,
    pub(crate) liveness: Arc<Liveness>,
}

impl SubscriptionEntry {
    /// Build the registry entry and the consumer stream for a new
    /// subscription.
    pub(crate) fn open(
        interest: Interest,
        criteria: FilterCriteria,
        capacity: usize,
        bus: Weak<BusInner>,
    ) -> (Self, EventStream) {
        let id = SubscriptionId::generate();
        let (sender, receiver) = mpsc::channel(capacity);
        let liveness = Arc::new(Liveness::new());

        let entry = Self {
            id,
            interest,
            criteria,
            sender,
            liveness: Arc::clone(&liveness),
        };
        let stream = EventStream {
            id,
            receiver,
            liveness,
            bus,
        };
        (entry, stream)
    }

    /// Enqueue without waiting. A full queue drops the event for this
    /// subscription only.
    pub(crate) fn try_deliver(&self, event: Arc<ChangeEvent>) -> Delivery {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.liveness.touch();
                Delivery::Enqueued
            }
            Err(TrySendError::Full(_)) => {
                self.liveness.missed.fetch_add(1, Ordering::Relaxed);
                Delivery::QueueFull
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub(crate) fn info(&self, now: Instant) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            interest: self.interest.clone(),
            criteria: self.criteria.clone(),
            created_at: self.liveness.created_at,
            idle_for: self.liveness.idle_for(now),
            queued: self.sender.max_capacity() - self.sender.capacity(),
            missed: self.liveness.missed(),
        }
    }
}

/// Read-only view of a registered subscription, for admin tooling.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    /// Subscription id.
    pub id: SubscriptionId,
    /// Registry buckets.
    pub interest: Interest,
    /// Per-event filter.
    pub criteria: FilterCriteria,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// Time since the last delivery or pull.
    pub idle_for: Duration,
    /// Events waiting in the queue.
    pub queued: usize,
    /// Events dropped because the queue was full.
    pub missed: u64,
}

/// Consumer half of a subscription: a lazy, unbounded sequence of events.
///
/// Receiving suspends until an event is queued or the subscription ends.
/// The sequence ends (yields `None`) once the subscription is removed by
/// `unsubscribe`, the reaper, or `stop()`. Dropping the stream unsubscribes.
pub struct EventStream {
    id: SubscriptionId,
    receiver: mpsc::Receiver<Arc<ChangeEvent>>,
    liveness: Arc<Liveness>,
    bus: Weak<BusInner>,
}

impl EventStream {
    /// Id of the subscription this stream drains.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event.
    ///
    /// # Returns
    ///
    /// - `Some(event)` - The next queued event, in publish order
    /// - `None` - The subscription has ended
    pub async fn recv(&mut self) -> Option<Arc<ChangeEvent>> {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Try to receive the next event without blocking.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(event))` - An event was queued
    /// - `Ok(None)` - Nothing queued right now
    /// - `Err(SubscriptionError::Closed)` - The subscription has ended
    pub fn try_recv(&mut self) -> Result<Option<Arc<ChangeEvent>>, SubscriptionError> {
        if self.liveness.is_closed() {
            return Err(SubscriptionError::Closed);
        }
        match self.receiver.try_recv() {
            Ok(event) => {
                self.liveness.touch();
                Ok(Some(event))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SubscriptionError::Closed),
        }
    }

    /// Number of events dropped for this subscription because its queue was
    /// full. Consumers that need gap detection compare this between pulls.
    #[must_use]
    pub fn missed(&self) -> u64 {
        self.liveness.missed()
    }

    /// Whether the subscription has been removed from the bus.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.liveness.is_closed()
    }

    /// Unsubscribe and release the queue.
    pub fn close(self) {
        drop(self);
    }

    /// Wrap this stream so events rejected by `authorizer` are skipped.
    #[must_use]
    pub fn authorized<A: EventAuthorizer>(self, authorizer: A) -> AuthorizedStream<A> {
        AuthorizedStream {
            inner: self,
            authorizer,
        }
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Arc<ChangeEvent>>> {
        if self.liveness.is_closed() {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                self.liveness.touch();
                Poll::Ready(Some(event))
            }
            other => other,
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Stream for EventStream {
    type Item = Arc<ChangeEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_event(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if self.liveness.is_closed() {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id, Removal::StreamDropped);
        }
    }
}

/// Per-subscriber visibility check applied by the consumer layer.
///
/// The bus never calls this; it exists so the transport can plug its own
/// authorization in front of each stream.
pub trait EventAuthorizer: Send + Sync {
    /// Return `false` to hide `event` from this subscriber.
    fn authorize(&self, event: &ChangeEvent) -> bool;
}

impl<F> EventAuthorizer for F
where
    F: Fn(&ChangeEvent) -> bool + Send + Sync,
{
    fn authorize(&self, event: &ChangeEvent) -> bool {
        self(event)
    }
}

/// An [`EventStream`] that silently skips events its authorizer rejects.
pub struct AuthorizedStream<A> {
    inner: EventStream,
    authorizer: A,
}

impl<A: EventAuthorizer> AuthorizedStream<A> {
    /// Id of the underlying subscription.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.inner.id()
    }

    /// Receive the next authorized event, or `None` once the subscription
    /// has ended.
    pub async fn recv(&mut self) -> Option<Arc<ChangeEvent>> {
        loop {
            let event = self.inner.recv().await?;
            if self.authorizer.authorize(&event) {
                return Some(event);
            }
        }
    }

    /// Unwrap the underlying stream.
    #[must_use]
    pub fn into_inner(self) -> EventStream {
        self.inner
    }
}

impl<A: EventAuthorizer + Unpin> Stream for AuthorizedStream<A> {
    type Item = Arc<ChangeEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match this.inner.poll_event(cx) {
                Poll::Ready(Some(event)) => {
                    if this.authorizer.authorize(&event) {
                        return Poll::Ready(Some(event));
                    }
                }
                other => return other,
            }
        }
    }
}
