//! Per-session usage ledger.
//!
//! Tracks, for every `(entity type, id)` a session currently cares about,
//! how many active interests (collections, single-entity subjects) hold it
//! and which version was last delivered. The ledger is the at-most-once
//! delivery gate: an event is forwarded only while listeners exist and its
//! version is newer than the last one sent.
//!
//! Keys are a flat `(EntityTypeId, EntityId)` composite in one table rather
//! than a map of maps; per-type queries scan, which is fine at per-session
//! cardinality.

use dashmap::DashMap;
use sayldb_commons::{EntityId, EntityTypeId, Version};

/// Delivery state for one tracked row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentState {
    pub last_sent_version: Option<Version>,
    pub listeners: u32,
}

impl Default for SentState {
    fn default() -> Self {
        Self {
            last_sent_version: Some(0),
            listeners: 0,
        }
    }
}

/// Outcome of a `decrease` call, so the session can tear down the type-level
/// feed subscription when the last id of a type goes away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecreaseOutcome {
    /// The id still has listeners.
    StillInUse,
    /// The id was removed but other ids of the type remain.
    IdRemoved,
    /// The id was removed and it was the last one of its type.
    TypeEmpty,
}

/// Reference-count and last-delivered-version ledger for one session.
pub struct UsageLedger {
    entries: DashMap<(EntityTypeId, EntityId), SentState>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add one interest for `(entity_type, id)`, creating the entry lazily.
    pub fn increase(&self, entity_type: &EntityTypeId, id: &EntityId) {
        let mut entry = self
            .entries
            .entry((entity_type.clone(), id.clone()))
            .or_default();
        entry.listeners += 1;
    }

    /// Drop one interest. The entry disappears at zero listeners; the
    /// returned outcome tells the caller whether the whole type became
    /// uninteresting. Decreasing an untracked id is a no-op.
    pub fn decrease(&self, entity_type: &EntityTypeId, id: &EntityId) -> DecreaseOutcome {
        let key = (entity_type.clone(), id.clone());
        let remove = match self.entries.get_mut(&key) {
            Some(mut entry) => {
                entry.listeners = entry.listeners.saturating_sub(1);
                entry.listeners == 0
            }
            None => return DecreaseOutcome::StillInUse,
        };
        if !remove {
            return DecreaseOutcome::StillInUse;
        }
        self.entries.remove(&key);
        if self.has_type(entity_type) {
            DecreaseOutcome::IdRemoved
        } else {
            DecreaseOutcome::TypeEmpty
        }
    }

    /// Remove the entry regardless of listener count (the row is gone).
    /// Returns true when an entry existed.
    pub fn evict(&self, entity_type: &EntityTypeId, id: &EntityId) -> bool {
        self.entries
            .remove(&(entity_type.clone(), id.clone()))
            .is_some()
    }

    /// The delivery gate. Untracked ids are simply not interesting; tracked
    /// ids deliver while listeners exist and the version is new. Version 0 is
    /// the forced-delivery sentinel.
    pub fn needs_delivery(
        &self,
        entity_type: &EntityTypeId,
        id: &EntityId,
        version: Version,
    ) -> bool {
        match self.entries.get(&(entity_type.clone(), id.clone())) {
            Some(entry) => {
                entry.listeners > 0
                    && match entry.last_sent_version {
                        None => true,
                        Some(last) => version == 0 || version > last,
                    }
            }
            None => false,
        }
    }

    pub fn mark_sent(&self, entity_type: &EntityTypeId, id: &EntityId, version: Version) {
        let mut entry = self
            .entries
            .entry((entity_type.clone(), id.clone()))
            .or_default();
        entry.last_sent_version = Some(version);
    }

    /// Whether any id of `entity_type` is currently tracked.
    pub fn has_type(&self, entity_type: &EntityTypeId) -> bool {
        self.entries
            .iter()
            .any(|entry| &entry.key().0 == entity_type)
    }

    pub fn listeners(&self, entity_type: &EntityTypeId, id: &EntityId) -> u32 {
        self.entries
            .get(&(entity_type.clone(), id.clone()))
            .map(|entry| entry.listeners)
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> (EntityTypeId, EntityId) {
        (EntityTypeId::new("tasks"), EntityId::new("t1"))
    }

    #[test]
    fn test_increase_then_decrease_removes_entry() {
        let ledger = UsageLedger::new();
        let (tasks, t1) = key();

        ledger.increase(&tasks, &t1);
        ledger.increase(&tasks, &t1);
        assert_eq!(ledger.listeners(&tasks, &t1), 2);

        assert_eq!(ledger.decrease(&tasks, &t1), DecreaseOutcome::StillInUse);
        assert_eq!(ledger.decrease(&tasks, &t1), DecreaseOutcome::TypeEmpty);
        assert_eq!(ledger.listeners(&tasks, &t1), 0);
        assert!(!ledger.has_type(&tasks));
    }

    #[test]
    fn test_decrease_reports_remaining_ids_of_type() {
        let ledger = UsageLedger::new();
        let tasks = EntityTypeId::new("tasks");
        ledger.increase(&tasks, &EntityId::new("t1"));
        ledger.increase(&tasks, &EntityId::new("t2"));

        assert_eq!(
            ledger.decrease(&tasks, &EntityId::new("t1")),
            DecreaseOutcome::IdRemoved
        );
        assert_eq!(
            ledger.decrease(&tasks, &EntityId::new("t2")),
            DecreaseOutcome::TypeEmpty
        );
    }

    #[test]
    fn test_decrease_untracked_is_noop() {
        let ledger = UsageLedger::new();
        let (tasks, t1) = key();
        assert_eq!(ledger.decrease(&tasks, &t1), DecreaseOutcome::StillInUse);
        assert_eq!(ledger.listeners(&tasks, &t1), 0);
    }

    #[test]
    fn test_needs_delivery_gating() {
        let ledger = UsageLedger::new();
        let (tasks, t1) = key();

        // Untracked: not interesting
        assert!(!ledger.needs_delivery(&tasks, &t1, 5));

        ledger.increase(&tasks, &t1);
        // Fresh entry: last sent defaults to 0, any newer version delivers
        assert!(ledger.needs_delivery(&tasks, &t1, 1));

        ledger.mark_sent(&tasks, &t1, 4);
        assert!(!ledger.needs_delivery(&tasks, &t1, 3));
        assert!(!ledger.needs_delivery(&tasks, &t1, 4));
        assert!(ledger.needs_delivery(&tasks, &t1, 5));

        // Version 0 forces delivery regardless of what was sent
        assert!(ledger.needs_delivery(&tasks, &t1, 0));
    }

    #[test]
    fn test_zero_listeners_blocks_delivery() {
        let ledger = UsageLedger::new();
        let (tasks, t1) = key();
        // mark_sent creates the entry but with no listeners
        ledger.mark_sent(&tasks, &t1, 1);
        assert!(!ledger.needs_delivery(&tasks, &t1, 2));
    }

    #[test]
    fn test_evict() {
        let ledger = UsageLedger::new();
        let (tasks, t1) = key();
        ledger.increase(&tasks, &t1);
        assert!(ledger.evict(&tasks, &t1));
        assert!(!ledger.evict(&tasks, &t1));
        assert!(!ledger.needs_delivery(&tasks, &t1, 9));
    }
}
