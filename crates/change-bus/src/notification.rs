//! Outbound notification shape handed to the transport layer.

use crate::event::{ChangeEvent, EventKind, ATTR_PREVIOUS_VALUES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Serializable view of a [`ChangeEvent`] as a subscriber sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub event_id: Uuid,
    pub change_type: EventKind,
    pub entity_id: Option<String>,
    pub entity: Option<Value>,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, Value>,
    /// Lifted from the `previous_values` attribute, when present.
    pub previous_values: Option<Value>,
}

impl From<&ChangeEvent> for ChangeNotification {
    fn from(event: &ChangeEvent) -> Self {
        Self {
            event_id: event.id(),
            change_type: event.kind(),
            entity_id: event.entity_id().map(str::to_string),
            entity: event.payload().cloned(),
            timestamp: event.occurred_at(),
            user_id: event.triggered_by().map(str::to_string),
            metadata: event.attributes().clone(),
            previous_values: event.attribute(ATTR_PREVIOUS_VALUES).cloned(),
        }
    }
}
