//! Live result counts.
//!
//! A `LiveCount` tracks how many rows satisfy a ground filter, updated
//! incrementally from feed events instead of re-counting. It keeps the
//! matching id set so membership flips (a patch moving a row in or out of
//! the filter) adjust the count exactly once.

use crate::session::SyncSession;
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use sayldb_commons::{EntityEvent, EntityId, EntityTypeId, Result, SaylDbError};
use sayldb_store::{
    EntityEventHandler, EntitySubscription, FieldSubscription, Filter, ReadOptions,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type CountCallback = Box<dyn Fn(usize) + Send + Sync>;

pub struct LiveCount {
    entity_type: EntityTypeId,
    filter: Filter,
    known: Mutex<BTreeSet<EntityId>>,
    callback: Mutex<Option<CountCallback>>,
    feed: Mutex<Option<EntitySubscription>>,
    field_feed: Mutex<Option<FieldSubscription>>,
    closed: AtomicBool,
}

impl LiveCount {
    /// Count rows matching `filter` and keep the count current. The filter
    /// must be ground: no sub-queries or parameters.
    pub async fn open(
        session: &Arc<SyncSession>,
        entity_type: EntityTypeId,
        filter: Filter,
    ) -> Result<Arc<Self>> {
        if filter.contains_sub_query() {
            return Err(SaylDbError::invalid_filter(
                "Live counts require a ground filter",
            ));
        }
        let schema = session.database().registry().get(&entity_type)?;

        let counter = Arc::new(Self {
            entity_type: entity_type.clone(),
            filter: filter.clone(),
            known: Mutex::new(BTreeSet::new()),
            callback: Mutex::new(None),
            feed: Mutex::new(None),
            field_feed: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let bus = session.database().bus();
        let handler = Arc::new(CountFeed {
            count: Arc::downgrade(&counter),
        });
        *counter.feed.lock() = Some(bus.subscribe(entity_type.clone(), handler));

        let mut hint = filter.referenced_fields();
        hint.insert(schema.primary_key.clone());
        *counter.field_feed.lock() = Some(bus.register_fields(entity_type.clone(), hint));

        let options = ReadOptions::new().project(vec![schema.primary_key.clone()]);
        let rows = session
            .database()
            .find(&entity_type, &filter, &options)
            .await?;
        {
            let mut known = counter.known.lock();
            for versioned in rows {
                if let Some(key) = versioned.row.get(&schema.primary_key) {
                    known.insert(EntityId::from_value(key));
                }
            }
        }
        debug!(
            "Live count on {} opened at {}",
            counter.entity_type,
            counter.get()
        );
        Ok(counter)
    }

    pub fn get(&self) -> usize {
        self.known.lock().len()
    }

    /// Register the change callback, invoked with the new count after every
    /// adjustment.
    pub fn on_change(&self, callback: CountCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.feed.lock() = None;
        *self.field_feed.lock() = None;
        *self.callback.lock() = None;
    }

    fn apply(&self, event: &EntityEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let changed = match event {
            EntityEvent::Add { id, item, .. } => {
                self.filter.matches(item) && self.known.lock().insert(id.clone())
            }
            EntityEvent::Update { id, item, .. } | EntityEvent::Patch { id, item, .. } => {
                if self.filter.matches(item) {
                    self.known.lock().insert(id.clone())
                } else {
                    self.known.lock().remove(id)
                }
            }
            EntityEvent::Remove { id, .. } => self.known.lock().remove(id),
            EntityEvent::RemoveMany { ids } => {
                let mut known = self.known.lock();
                let before = known.len();
                for id in ids {
                    known.remove(id);
                }
                known.len() != before
            }
        };
        if changed {
            let count = self.get();
            if let Some(callback) = self.callback.lock().as_ref() {
                callback(count);
            }
        }
    }
}

struct CountFeed {
    count: Weak<LiveCount>,
}

#[async_trait]
impl EntityEventHandler for CountFeed {
    async fn on_event(&self, event: &EntityEvent) {
        if let Some(count) = self.count.upgrade() {
            count.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveSyncConfig;
    use sayldb_commons::{CapturingSink, Row, SessionId};
    use sayldb_store::{Database, EntityEventBus, EntitySchema, SchemaRegistry};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    async fn setup() -> (Arc<Database>, Arc<SyncSession>) {
        let registry = SchemaRegistry::new();
        registry.register(EntitySchema::new("tasks", "id"));
        let database = Database::new(registry, EntityEventBus::new());
        let session = SyncSession::new(
            SessionId::new("s1"),
            database.clone(),
            Arc::new(CapturingSink::new()),
            LiveSyncConfig::default(),
        );
        database
            .insert(
                &EntityTypeId::new("tasks"),
                Row::from_json(json!({"id": "t1", "status": "open"})),
            )
            .await
            .unwrap();
        (database, session)
    }

    #[tokio::test]
    async fn test_count_tracks_membership_transitions() {
        let (database, session) = setup().await;
        let tasks = EntityTypeId::new("tasks");

        let count = LiveCount::open(&session, tasks.clone(), Filter::eq("status", json!("open")))
            .await
            .unwrap();
        assert_eq!(count.get(), 1);

        database
            .insert(&tasks, Row::from_json(json!({"id": "t2", "status": "open"})))
            .await
            .unwrap();
        assert_eq!(count.get(), 2);

        // Leaving the filter decrements
        database
            .patch_many(
                &tasks,
                &Filter::eq("id", json!("t1")),
                &Row::from_json(json!({"status": "closed"})),
            )
            .await
            .unwrap();
        assert_eq!(count.get(), 1);

        // Non-matching insert is ignored
        database
            .insert(&tasks, Row::from_json(json!({"id": "t3", "status": "done"})))
            .await
            .unwrap();
        assert_eq!(count.get(), 1);

        database.delete_many(&tasks, &Filter::All).await.unwrap();
        assert_eq!(count.get(), 0);
    }

    #[tokio::test]
    async fn test_count_callback_and_close() {
        let (database, session) = setup().await;
        let tasks = EntityTypeId::new("tasks");

        let count = LiveCount::open(&session, tasks.clone(), Filter::eq("status", json!("open")))
            .await
            .unwrap();
        let observed = Arc::new(AtomicUsize::new(usize::MAX));
        let observed_in_cb = observed.clone();
        count.on_change(Box::new(move |value| {
            observed_in_cb.store(value, Ordering::SeqCst);
        }));

        database
            .insert(&tasks, Row::from_json(json!({"id": "t2", "status": "open"})))
            .await
            .unwrap();
        assert_eq!(observed.load(Ordering::SeqCst), 2);

        count.close();
        database
            .insert(&tasks, Row::from_json(json!({"id": "t4", "status": "open"})))
            .await
            .unwrap();
        assert_eq!(count.get(), 2);
    }

    #[tokio::test]
    async fn test_count_rejects_sub_query_filters() {
        let (_database, session) = setup().await;
        let filter = Filter::sub(
            "author",
            sayldb_store::SubQuery::new("users", Filter::All, "id"),
        );
        let result = LiveCount::open(&session, EntityTypeId::new("tasks"), filter).await;
        assert!(result.is_err());
    }
}
