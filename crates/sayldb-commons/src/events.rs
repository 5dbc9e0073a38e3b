//! Entity lifecycle events published on the event bus.
//!
//! Every row mutation in the store produces exactly one event per affected
//! row (or one `RemoveMany` for a bulk delete). Events carry a per-row
//! monotonically increasing version used by sessions for at-most-once
//! delivery gating.

use crate::models::{EntityId, Row};
use serde::{Deserialize, Serialize};

/// Per-row mutation counter. Version 0 is the forced-delivery sentinel used
/// for freshly fetched single-entity snapshots; the delivery gate treats it
/// as "always newer".
pub type Version = u64;

/// One entity lifecycle event, scoped to an entity type by the bus channel it
/// is published on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EntityEvent {
    /// A new row appeared.
    Add {
        id: EntityId,
        version: Version,
        item: Row,
    },
    /// A row was fully replaced.
    Update {
        id: EntityId,
        version: Version,
        item: Row,
    },
    /// A row was partially changed. `patch` is the diff; `item` is the full
    /// row after the patch, used for membership predicate evaluation.
    Patch {
        id: EntityId,
        version: Version,
        patch: Row,
        item: Row,
    },
    /// A single row was deleted.
    Remove { id: EntityId, version: Version },
    /// A bulk delete removed many rows at once. Carries no versions: the
    /// rows are gone, delivery gating does not apply.
    RemoveMany { ids: Vec<EntityId> },
}

impl EntityEvent {
    /// The single affected id, when the event targets exactly one row.
    pub fn id(&self) -> Option<&EntityId> {
        match self {
            EntityEvent::Add { id, .. }
            | EntityEvent::Update { id, .. }
            | EntityEvent::Patch { id, .. }
            | EntityEvent::Remove { id, .. } => Some(id),
            EntityEvent::RemoveMany { .. } => None,
        }
    }

    /// The columns this event touches, for field-hint delivery skipping.
    /// `None` means "all columns" (adds, updates, removes).
    pub fn touched_fields(&self) -> Option<&Row> {
        match self {
            EntityEvent::Patch { patch, .. } => Some(patch),
            _ => None,
        }
    }
}
