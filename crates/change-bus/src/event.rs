//! # Change Events
//!
//! Defines the immutable change record that flows through the bus, and the
//! named constructors the entity mutation layer uses after each operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Attribute key holding the name of the mutation that produced an event.
pub const ATTR_OPERATION: &str = "operation";

/// Attribute key holding pre-update field values.
pub const ATTR_PREVIOUS_VALUES: &str = "previous_values";

/// Attribute key holding the last snapshot of a deleted entity.
pub const ATTR_DELETED_ENTITY: &str = "deleted_entity";

/// Attribute key holding the member ids of a batch operation.
pub const ATTR_ENTITY_IDS: &str = "entity_ids";

/// Attribute key holding the member count of a batch operation.
pub const ATTR_ENTITY_COUNT: &str = "entity_count";

/// The kind of change an event describes.
///
/// Also used as the registry bucket key: subscriptions that declare an
/// explicit interest are registered once per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// An entity was created.
    Created,
    /// An entity was modified.
    Updated,
    /// An entity was removed.
    Deleted,
    /// An entity's status field changed.
    StatusChanged,
    /// Summary of a multi-entity operation.
    BatchOperation,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 5] = [
        EventKind::Created,
        EventKind::Updated,
        EventKind::Deleted,
        EventKind::StatusChanged,
        EventKind::BatchOperation,
    ];

    /// Wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
            Self::StatusChanged => "STATUS_CHANGED",
            Self::BatchOperation => "BATCH_OPERATION",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entity-change notification.
///
/// Events are built once by the publisher and then shared behind an `Arc`
/// with every subscription that receives them. There is no way to mutate an
/// event after construction other than the consuming builder methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    id: Uuid,
    kind: EventKind,
    entity_id: Option<String>,
    payload: Option<Value>,
    occurred_at: DateTime<Utc>,
    triggered_by: Option<String>,
    #[serde(default)]
    attributes: HashMap<String, Value>,
}

impl ChangeEvent {
    /// Create a bare event of the given kind, stamped with a fresh id and the
    /// current time.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            entity_id: None,
            payload: None,
            occurred_at: Utc::now(),
            triggered_by: None,
            attributes: HashMap::new(),
        }
    }

    /// An entity was created; `payload` is its initial state.
    #[must_use]
    pub fn created(entity_id: impl Into<String>, payload: Value) -> Self {
        Self::new(EventKind::Created)
            .with_entity_id(entity_id)
            .with_payload(payload)
            .with_attribute(ATTR_OPERATION, "create")
    }

    /// An entity was updated; `previous_values` holds the fields as they
    /// were before the change.
    #[must_use]
    pub fn updated(entity_id: impl Into<String>, payload: Value, previous_values: Value) -> Self {
        Self::new(EventKind::Updated)
            .with_entity_id(entity_id)
            .with_payload(payload)
            .with_attribute(ATTR_OPERATION, "update")
            .with_attribute(ATTR_PREVIOUS_VALUES, previous_values)
    }

    /// An entity was deleted. Deletions carry no payload; the last known
    /// state travels in the `deleted_entity` attribute instead.
    #[must_use]
    pub fn deleted(entity_id: impl Into<String>, snapshot: Value) -> Self {
        Self::new(EventKind::Deleted)
            .with_entity_id(entity_id)
            .with_attribute(ATTR_OPERATION, "delete")
            .with_attribute(ATTR_DELETED_ENTITY, snapshot)
    }

    /// An entity's status changed.
    #[must_use]
    pub fn status_changed(
        entity_id: impl Into<String>,
        payload: Value,
        previous_status: Value,
    ) -> Self {
        Self::new(EventKind::StatusChanged)
            .with_entity_id(entity_id)
            .with_payload(payload)
            .with_attribute(ATTR_OPERATION, "status_change")
            .with_attribute(
                ATTR_PREVIOUS_VALUES,
                serde_json::json!({ "status": previous_status }),
            )
    }

    /// Summary of a batch operation over `entity_ids`. Not tied to a single
    /// entity, so `entity_id` stays empty.
    #[must_use]
    pub fn batch(operation: impl Into<String>, entity_ids: Vec<String>) -> Self {
        let count = entity_ids.len();
        Self::new(EventKind::BatchOperation)
            .with_attribute(ATTR_OPERATION, operation.into())
            .with_attribute(ATTR_ENTITY_COUNT, count)
            .with_attribute(ATTR_ENTITY_IDS, entity_ids)
    }

    /// Set the affected entity id.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Set the entity snapshot.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Record the principal that caused the change.
    #[must_use]
    pub fn with_triggered_by(mut self, principal: impl Into<String>) -> Self {
        self.triggered_by = Some(principal.into());
        self
    }

    /// Attach a free-form attribute, replacing any previous value for `key`.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Unique event id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Kind of change.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Affected entity, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    /// Entity snapshot, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Creation time of the event.
    #[must_use]
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Acting principal, if known.
    #[must_use]
    pub fn triggered_by(&self) -> Option<&str> {
        self.triggered_by.as_deref()
    }

    /// All attributes.
    #[must_use]
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Look up one attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}
