//! # Event Filters
//!
//! `FilterCriteria` is the per-subscription predicate the bus evaluates for
//! every candidate at publish time. `ChangeFilter` is the looser input shape
//! a client hands to the stream consumer layer; it converts into criteria.

use crate::event::{ChangeEvent, EventKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What a subscriber wants to see.
///
/// Each axis is optional; `None` means "no restriction on that axis". An
/// event passes only if every present axis matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Accepted kinds.
    pub kinds: Option<HashSet<EventKind>>,
    /// Accepted entity ids.
    pub entity_ids: Option<HashSet<String>>,
    /// Required acting principal.
    pub triggered_by: Option<String>,
    /// Required attribute values, compared by JSON equality.
    pub attributes: Option<HashMap<String, Value>>,
}

impl FilterCriteria {
    /// Criteria that accept every event.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to the given kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Restrict to the given entity ids.
    #[must_use]
    pub fn with_entity_ids<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.entity_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to events triggered by `principal`.
    #[must_use]
    pub fn with_triggered_by(mut self, principal: impl Into<String>) -> Self {
        self.triggered_by = Some(principal.into());
        self
    }

    /// Require `key` to equal `value` in the event's attributes.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// True if no axis is restricted.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.kinds.is_none()
            && self.entity_ids.is_none()
            && self.triggered_by.is_none()
            && self.attributes.is_none()
    }

    /// Check if an event matches these criteria.
    ///
    /// An attribute required to be `null` also matches events that do not
    /// carry the key at all.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }

        if let Some(ids) = &self.entity_ids {
            match event.entity_id() {
                Some(id) if ids.contains(id) => {}
                _ => return false,
            }
        }

        if let Some(principal) = &self.triggered_by {
            if event.triggered_by() != Some(principal.as_str()) {
                return false;
            }
        }

        if let Some(required) = &self.attributes {
            for (key, expected) in required {
                if event.attribute(key).unwrap_or(&Value::Null) != expected {
                    return false;
                }
            }
        }

        true
    }
}

/// Client-supplied subscription filter.
///
/// Field names follow the subscription API exposed to clients. Convert with
/// [`ChangeFilter::into_criteria`] before subscribing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeFilter {
    /// Only these change types.
    pub change_types: Option<Vec<EventKind>>,
    /// Only these entities.
    pub entity_ids: Option<Vec<String>>,
    /// Only changes made by this user.
    pub user_id: Option<String>,
    /// Whether batch-operation summaries are wanted.
    pub include_batch_operations: bool,
    /// Attribute key/value pairs that must match.
    pub attribute_filters: Option<HashMap<String, Value>>,
}

impl Default for ChangeFilter {
    fn default() -> Self {
        Self {
            change_types: None,
            entity_ids: None,
            user_id: None,
            include_batch_operations: true,
            attribute_filters: None,
        }
    }
}

impl ChangeFilter {
    /// Convert into bus criteria.
    ///
    /// Empty lists are treated as absent. Excluding batch operations removes
    /// `BatchOperation` from the requested types, or, when no types were
    /// requested, restricts to every other kind.
    #[must_use]
    pub fn into_criteria(self) -> FilterCriteria {
        let mut kinds: Option<HashSet<EventKind>> = self
            .change_types
            .filter(|types| !types.is_empty())
            .map(|types| types.into_iter().collect());

        if !self.include_batch_operations {
            let set = kinds.get_or_insert_with(|| EventKind::ALL.into_iter().collect());
            set.remove(&EventKind::BatchOperation);
        }

        FilterCriteria {
            kinds,
            entity_ids: self
                .entity_ids
                .filter(|ids| !ids.is_empty())
                .map(|ids| ids.into_iter().collect()),
            triggered_by: self.user_id.filter(|user| !user.is_empty()),
            attributes: self.attribute_filters.filter(|attrs| !attrs.is_empty()),
        }
    }
}

impl From<ChangeFilter> for FilterCriteria {
    fn from(filter: ChangeFilter) -> Self {
        filter.into_criteria()
    }
}
