//! # Change Bus - In-Process Change Event Broadcasting
//!
//! Fans entity-change events out to many concurrent, long-lived subscription
//! streams.
//!
//! ```text
//! ┌────────────────┐  publish()   ┌──────────────┐  try_send   ┌─────────────┐
//! │ Mutation layer │ ───────────► │  ChangeBus   │ ──────────► │ EventStream │ ─► client
//! └────────────────┘              │  registry    │ ──────────► │ EventStream │ ─► client
//!                                 │  reaper      │             └─────────────┘
//!                                 └──────────────┘
//!                                        ▲  subscribe() / unsubscribe()
//!                                        │
//!                                 Stream consumer layer
//! ```
//!
//! ## Delivery Guarantees
//!
//! - **Best effort:** a subscriber whose queue is full misses the event;
//!   the publisher never waits.
//! - **Per-subscription order:** events reach one subscriber in the order
//!   they were published. No ordering holds across subscribers.
//! - **Bounded memory:** every queue holds at most `max_queue_size` events.
//! - **Reclamation:** subscriptions idle for twice the cleanup interval are
//!   removed by the reaper; dropping a stream removes its subscription at
//!   once.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod config;
pub mod event;
pub mod feeds;
pub mod filter;
pub mod notification;
pub mod publisher;
pub mod stats;
pub mod subscription;

// Re-export main types
pub use bus::ChangeBus;
pub use config::{BusConfig, ConfigError, DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_QUEUE_SIZE};
pub use event::{ChangeEvent, EventKind};
pub use feeds::Feed;
pub use filter::{ChangeFilter, FilterCriteria};
pub use notification::ChangeNotification;
pub use publisher::EventPublisher;
pub use stats::BusStats;
pub use subscription::{
    AuthorizedStream, EventAuthorizer, EventStream, Interest, SubscriptionError, SubscriptionId,
    SubscriptionInfo,
};
