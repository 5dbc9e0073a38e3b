//! Entity event bus.
//!
//! The bus is the seam between store mutations and live sync sessions: the
//! store publishes one `EntityEvent` per affected row, and every subscriber
//! registered for that entity type receives it. Handlers run sequentially
//! per event so a session observes mutations in publish order.
//!
//! # Field hints
//!
//! Every subscriber declares its column interest. Narrow subscribers
//! (projected collections, counts) register the columns they care about;
//! subscribers that need the whole row register an all-columns hint. A
//! `Patch` event is dropped before fan-out only when hints exist for the
//! entity type and every one of them names columns the patch does not touch.
//! Events other than `Patch` always fan out: adds, updates and removes
//! change membership regardless of columns.

use async_trait::async_trait;
use dashmap::DashMap;
use log::trace;
use sayldb_commons::{EntityEvent, EntityTypeId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receiver of entity events for one entity type.
#[async_trait]
pub trait EntityEventHandler: Send + Sync {
    async fn on_event(&self, event: &EntityEvent);
}

struct HandlerEntry {
    id: u64,
    handler: Arc<dyn EntityEventHandler>,
}

struct FieldHintEntry {
    id: u64,
    /// `None` means every column matters to this subscriber.
    fields: Option<BTreeSet<String>>,
}

/// Fan-out hub for entity lifecycle events, keyed by entity type.
pub struct EntityEventBus {
    handlers: DashMap<EntityTypeId, Vec<HandlerEntry>>,
    field_hints: DashMap<EntityTypeId, Vec<FieldHintEntry>>,
    next_id: AtomicU64,
    /// Handed to subscription handles so dropping one can unsubscribe.
    self_ref: Weak<EntityEventBus>,
}

impl EntityEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            handlers: DashMap::new(),
            field_hints: DashMap::new(),
            next_id: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        })
    }

    /// Register a handler for one entity type. Dropping the returned handle
    /// unsubscribes.
    pub fn subscribe(
        &self,
        entity_type: EntityTypeId,
        handler: Arc<dyn EntityEventHandler>,
    ) -> EntitySubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(entity_type.clone())
            .or_default()
            .push(HandlerEntry { id, handler });
        EntitySubscription {
            bus: self.self_ref.clone(),
            entity_type,
            id,
        }
    }

    /// Declare interest in a set of columns for an entity type. A patch is
    /// skipped only when every hint registered for the type misses it.
    pub fn register_fields(
        &self,
        entity_type: EntityTypeId,
        fields: BTreeSet<String>,
    ) -> FieldSubscription {
        self.push_hint(entity_type, Some(fields))
    }

    /// Declare interest in every column of an entity type. While such a hint
    /// exists, no patch on the type is skipped.
    pub fn register_all_fields(&self, entity_type: EntityTypeId) -> FieldSubscription {
        self.push_hint(entity_type, None)
    }

    fn push_hint(
        &self,
        entity_type: EntityTypeId,
        fields: Option<BTreeSet<String>>,
    ) -> FieldSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.field_hints
            .entry(entity_type.clone())
            .or_default()
            .push(FieldHintEntry { id, fields });
        FieldSubscription {
            bus: self.self_ref.clone(),
            entity_type,
            id,
        }
    }

    /// Publish one event to every subscriber of `entity_type`, sequentially.
    pub async fn publish(&self, entity_type: &EntityTypeId, event: &EntityEvent) {
        if self.skip_by_field_hints(entity_type, event) {
            trace!(
                "Skipping patch on {}: no hinted column touched",
                entity_type
            );
            return;
        }

        // Snapshot handlers before awaiting; holding a shard guard across an
        // await would deadlock against subscribe/unsubscribe.
        let handlers: Vec<Arc<dyn EntityEventHandler>> = match self.handlers.get(entity_type) {
            Some(entries) => entries.iter().map(|e| e.handler.clone()).collect(),
            None => return,
        };

        for handler in handlers {
            handler.on_event(event).await;
        }
    }

    pub fn subscriber_count(&self, entity_type: &EntityTypeId) -> usize {
        self.handlers
            .get(entity_type)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    fn skip_by_field_hints(&self, entity_type: &EntityTypeId, event: &EntityEvent) -> bool {
        let Some(patch) = event.touched_fields() else {
            return false;
        };
        let Some(hints) = self.field_hints.get(entity_type) else {
            return false;
        };
        if hints.is_empty() {
            return false;
        }
        !hints.iter().any(|hint| match &hint.fields {
            None => true,
            Some(fields) => patch.keys().any(|column| fields.contains(column)),
        })
    }

    fn unsubscribe(&self, entity_type: &EntityTypeId, id: u64) {
        if let Some(mut entries) = self.handlers.get_mut(entity_type) {
            entries.retain(|entry| entry.id != id);
        }
    }

    fn remove_fields(&self, entity_type: &EntityTypeId, id: u64) {
        if let Some(mut entries) = self.field_hints.get_mut(entity_type) {
            entries.retain(|entry| entry.id != id);
        }
    }
}

/// Handle for one handler registration; unsubscribes on drop.
pub struct EntitySubscription {
    bus: Weak<EntityEventBus>,
    entity_type: EntityTypeId,
    id: u64,
}

impl EntitySubscription {
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.entity_type, self.id);
        }
    }
}

impl Drop for EntitySubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Handle for one field hint registration; removed on drop.
pub struct FieldSubscription {
    bus: Weak<EntityEventBus>,
    entity_type: EntityTypeId,
    id: u64,
}

impl Drop for FieldSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_fields(&self.entity_type, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sayldb_commons::{EntityId, Row};
    use serde_json::json;

    struct Recorder {
        events: Mutex<Vec<EntityEvent>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.events.lock().len()
        }
    }

    #[async_trait]
    impl EntityEventHandler for Recorder {
        async fn on_event(&self, event: &EntityEvent) {
            self.events.lock().push(event.clone());
        }
    }

    fn patch_event(fields: serde_json::Value) -> EntityEvent {
        EntityEvent::Patch {
            id: EntityId::new("t1"),
            version: 2,
            patch: Row::from_json(fields.clone()),
            item: Row::from_json(fields),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EntityEventBus::new();
        let tasks = EntityTypeId::new("tasks");
        let recorder = Recorder::new();
        let _sub = bus.subscribe(tasks.clone(), recorder.clone());

        bus.publish(&tasks, &patch_event(json!({"status": "done"})))
            .await;
        assert_eq!(recorder.count(), 1);

        // Other entity types do not leak over
        bus.publish(&EntityTypeId::new("users"), &patch_event(json!({"x": 1})))
            .await;
        assert_eq!(recorder.count(), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let bus = EntityEventBus::new();
        let tasks = EntityTypeId::new("tasks");
        let recorder = Recorder::new();
        let sub = bus.subscribe(tasks.clone(), recorder.clone());
        assert_eq!(bus.subscriber_count(&tasks), 1);

        drop(sub);
        assert_eq!(bus.subscriber_count(&tasks), 0);

        bus.publish(&tasks, &patch_event(json!({"status": "done"})))
            .await;
        assert_eq!(recorder.count(), 0);
    }

    #[tokio::test]
    async fn test_field_hints_skip_unrelated_patches() {
        let bus = EntityEventBus::new();
        let tasks = EntityTypeId::new("tasks");
        let recorder = Recorder::new();
        let _sub = bus.subscribe(tasks.clone(), recorder.clone());
        let _hint = bus.register_fields(
            tasks.clone(),
            ["status".to_string()].into_iter().collect(),
        );

        bus.publish(&tasks, &patch_event(json!({"title": "new"}))).await;
        assert_eq!(recorder.count(), 0);

        bus.publish(&tasks, &patch_event(json!({"status": "done"})))
            .await;
        assert_eq!(recorder.count(), 1);

        // Non-patch events always fan out
        bus.publish(
            &tasks,
            &EntityEvent::Remove {
                id: EntityId::new("t1"),
                version: 3,
            },
        )
        .await;
        assert_eq!(recorder.count(), 2);
    }

    #[tokio::test]
    async fn test_all_fields_hint_keeps_unrelated_patches_flowing() {
        let bus = EntityEventBus::new();
        let tasks = EntityTypeId::new("tasks");
        let recorder = Recorder::new();
        let _sub = bus.subscribe(tasks.clone(), recorder.clone());

        // A narrow hint alone must not starve a subscriber that needs the
        // whole row and has declared so.
        let _narrow = bus.register_fields(
            tasks.clone(),
            ["status".to_string()].into_iter().collect(),
        );
        let all = bus.register_all_fields(tasks.clone());

        bus.publish(&tasks, &patch_event(json!({"title": "new"}))).await;
        assert_eq!(recorder.count(), 1);

        // Once the full-row interest is gone the narrow hint applies again.
        drop(all);
        bus.publish(&tasks, &patch_event(json!({"title": "newer"})))
            .await;
        assert_eq!(recorder.count(), 1);
    }

    #[tokio::test]
    async fn test_dropping_hint_restores_full_fanout() {
        let bus = EntityEventBus::new();
        let tasks = EntityTypeId::new("tasks");
        let recorder = Recorder::new();
        let _sub = bus.subscribe(tasks.clone(), recorder.clone());

        let hint = bus.register_fields(
            tasks.clone(),
            ["status".to_string()].into_iter().collect(),
        );
        bus.publish(&tasks, &patch_event(json!({"title": "a"}))).await;
        assert_eq!(recorder.count(), 0);

        drop(hint);
        bus.publish(&tasks, &patch_event(json!({"title": "b"}))).await;
        assert_eq!(recorder.count(), 1);
    }
}
