//! Named subscription feeds offered to clients.
//!
//! Each feed fixes the registry interest; a client filter narrows it further.

use crate::event::EventKind;
use crate::filter::FilterCriteria;
use crate::subscription::Interest;
use serde::{Deserialize, Serialize};

/// A named (interest, criteria) preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "feed", rename_all = "snake_case")]
pub enum Feed {
    /// Every change.
    AllChanges,
    /// Entity creations.
    Created,
    /// Updates and status changes, optionally for one entity.
    Updated {
        #[serde(default)]
        entity_id: Option<String>,
    },
    /// Entity deletions.
    Deleted,
    /// Batch-operation summaries.
    BatchOperations,
}

impl Feed {
    /// Registry buckets this feed subscribes to.
    #[must_use]
    pub fn interest(&self) -> Interest {
        match self {
            Self::AllChanges => Interest::All,
            Self::Created => Interest::only(EventKind::Created),
            Self::Updated { .. } => {
                Interest::kinds([EventKind::Updated, EventKind::StatusChanged])
            }
            Self::Deleted => Interest::only(EventKind::Deleted),
            Self::BatchOperations => Interest::only(EventKind::BatchOperation),
        }
    }

    /// Apply the feed's own narrowing to client-supplied criteria.
    ///
    /// `Updated { entity_id: Some(..) }` adds the id to the entity set; if
    /// the client already restricted entities, the feed's id joins that set.
    #[must_use]
    pub fn criteria(&self, mut base: FilterCriteria) -> FilterCriteria {
        if let Self::Updated {
            entity_id: Some(id),
        } = self
        {
            base.entity_ids
                .get_or_insert_with(Default::default)
                .insert(id.clone());
        }
        base
    }
}
