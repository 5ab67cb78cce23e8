//! # Event Publisher
//!
//! The publishing side as seen by the entity mutation layer.

use crate::event::ChangeEvent;

/// Trait for publishing change events.
///
/// Publishing never waits on subscribers, so the trait is synchronous and
/// safe to call from inside a request handler.
pub trait EventPublisher: Send + Sync {
    /// Publish an event.
    ///
    /// # Returns
    ///
    /// The number of subscriptions the event was enqueued to.
    fn publish(&self, event: ChangeEvent) -> usize;

    /// Get the total number of events published.
    fn events_published(&self) -> u64;

    /// Publish the result of a batch create: one `Created` event per entity,
    /// then a single `BatchOperation` summary naming all of them.
    ///
    /// `triggered_by` is stamped on the summary, and on each creation event
    /// that does not already carry a principal.
    ///
    /// # Returns
    ///
    /// Total deliveries across all published events.
    fn publish_batch_created(
        &self,
        events: Vec<ChangeEvent>,
        triggered_by: Option<&str>,
    ) -> usize {
        let mut entity_ids = Vec::with_capacity(events.len());
        let mut delivered = 0;

        for mut event in events {
            if let Some(id) = event.entity_id() {
                entity_ids.push(id.to_string());
            }
            if event.triggered_by().is_none() {
                if let Some(principal) = triggered_by {
                    event = event.with_triggered_by(principal);
                }
            }
            delivered += self.publish(event);
        }

        let mut summary = ChangeEvent::batch("batch_create", entity_ids);
        if let Some(principal) = triggered_by {
            summary = summary.with_triggered_by(principal);
        }
        delivered + self.publish(summary)
    }
}
