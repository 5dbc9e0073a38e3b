//! Per-connection sync sessions.
//!
//! A `SyncSession` owns everything one client connection tracks: the usage
//! ledger, one lazily-created bus subscription per entity type in use, and
//! the outbound sink. The embedded feed router turns bus events into entity
//! channel messages, gated by the ledger so each version reaches the client
//! at most once.
//!
//! # Lifecycle
//!
//! The type-level bus subscription exists exactly while at least one id of
//! that type is tracked. `increase_usage` creates it on first interest,
//! `decrease_usage` tears it down when the last id goes away, and `destroy`
//! (connection closed) drops everything at once.

use crate::config::LiveSyncConfig;
use crate::usage::{DecreaseOutcome, UsageLedger};
use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use sayldb_commons::{
    ClientSink, EntityEvent, EntityId, EntityTypeId, Result, Row, SessionId, SyncMessage, Version,
};
use sayldb_store::{Database, EntityEventHandler, EntitySubscription, FieldSubscription, Filter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

pub struct SyncSession {
    id: SessionId,
    database: Arc<Database>,
    sink: Arc<dyn ClientSink>,
    config: LiveSyncConfig,
    ledger: UsageLedger,
    feeds: DashMap<EntityTypeId, SessionFeed>,
    created_at_ms: i64,
    destroyed: AtomicBool,
    /// Handed to feed routers and subjects; they must not keep the session
    /// alive past connection teardown.
    self_ref: Weak<SyncSession>,
}

impl SyncSession {
    pub fn new(
        id: SessionId,
        database: Arc<Database>,
        sink: Arc<dyn ClientSink>,
        config: LiveSyncConfig,
    ) -> Arc<Self> {
        debug!("Creating sync session {}", id);
        Arc::new_cyclic(|self_ref| Self {
            id,
            database,
            sink,
            config,
            ledger: UsageLedger::new(),
            feeds: DashMap::new(),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            destroyed: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn config(&self) -> &LiveSyncConfig {
        &self.config
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    /// Track one more interest in `(entity_type, id)`, creating the
    /// type-level feed subscription on first interest. Idempotent at the
    /// subscription level.
    pub fn increase_usage(&self, entity_type: &EntityTypeId, id: &EntityId) {
        self.ledger.increase(entity_type, id);
        self.feeds.entry(entity_type.clone()).or_insert_with(|| {
            debug!("Session {}: subscribing feed for {}", self.id, entity_type);
            let router = Arc::new(FeedRouter {
                session: self.self_ref.clone(),
                entity_type: entity_type.clone(),
            });
            let bus = self.database.bus();
            SessionFeed {
                _subscription: bus.subscribe(entity_type.clone(), router),
                _hint: bus.register_all_fields(entity_type.clone()),
            }
        });
    }

    /// Drop one interest; tears down the type-level feed subscription when
    /// the last id of the type goes away.
    pub fn decrease_usage(&self, entity_type: &EntityTypeId, id: &EntityId) {
        if self.ledger.decrease(entity_type, id) == DecreaseOutcome::TypeEmpty {
            debug!(
                "Session {}: unsubscribing feed for {}",
                self.id, entity_type
            );
            self.feeds.remove(entity_type);
        }
    }

    pub fn needs_delivery(
        &self,
        entity_type: &EntityTypeId,
        id: &EntityId,
        version: Version,
    ) -> bool {
        self.ledger.needs_delivery(entity_type, id, version)
    }

    pub fn mark_sent(&self, entity_type: &EntityTypeId, id: &EntityId, version: Version) {
        self.ledger.mark_sent(entity_type, id, version);
    }

    /// Whether the session holds a live feed subscription for `entity_type`.
    pub fn has_feed(&self, entity_type: &EntityTypeId) -> bool {
        self.feeds.contains_key(entity_type)
    }

    pub fn listeners(&self, entity_type: &EntityTypeId, id: &EntityId) -> u32 {
        self.ledger.listeners(entity_type, id)
    }

    /// Push a message to the client. No-op once the session is destroyed.
    pub fn send(&self, message: SyncMessage) {
        if !self.destroyed.load(Ordering::Acquire) {
            self.sink.send(message);
        }
    }

    /// Fetch a single entity and keep tracking it. The snapshot is marked
    /// sent at version 0 so the next mutation is always delivered.
    pub async fn find_one_or_none(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
    ) -> Result<Option<EntitySubject>> {
        let Some(versioned) = self.database.find_one(entity_type, filter).await? else {
            return Ok(None);
        };
        let schema = self.database.registry().get(entity_type)?;
        let key = versioned
            .row
            .get(&schema.primary_key)
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let id = EntityId::from_value(&key);

        self.increase_usage(entity_type, &id);
        self.mark_sent(entity_type, &id, 0);

        Ok(Some(EntitySubject {
            session: self.self_ref.clone(),
            entity_type: entity_type.clone(),
            id,
            row: versioned.row,
            version: versioned.version,
            released: AtomicBool::new(false),
        }))
    }

    /// Like `find_one_or_none` but a missing row is an error.
    pub async fn find_one(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
    ) -> Result<EntitySubject> {
        self.find_one_or_none(entity_type, filter)
            .await?
            .ok_or_else(|| {
                sayldb_commons::SaylDbError::not_found(format!("{} matching filter", entity_type))
            })
    }

    /// Tear the session down: stop pushing, drop every feed subscription and
    /// forget all tracked ids. Called when the connection closes.
    pub fn destroy(&self) {
        debug!("Destroying sync session {}", self.id);
        self.destroyed.store(true, Ordering::Release);
        self.feeds.clear();
        self.ledger.clear();
    }

    fn evict(&self, entity_type: &EntityTypeId, id: &EntityId) {
        if self.ledger.evict(entity_type, id) && !self.ledger.has_type(entity_type) {
            self.feeds.remove(entity_type);
        }
    }
}

/// Feed state for one tracked entity type: the bus subscription plus an
/// all-columns hint, since the entity channel forwards every patch on a
/// tracked id no matter which columns it touches.
struct SessionFeed {
    _subscription: EntitySubscription,
    _hint: FieldSubscription,
}

/// Routes bus events for one entity type into the session's entity channel.
struct FeedRouter {
    session: Weak<SyncSession>,
    entity_type: EntityTypeId,
}

#[async_trait]
impl EntityEventHandler for FeedRouter {
    async fn on_event(&self, event: &EntityEvent) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        match event {
            // Membership of adds is a live collection concern; the entity
            // channel never forwards them.
            EntityEvent::Add { .. } => {}

            // The rows are gone: bypass the version gate, evict tracking
            // state for every id and always notify.
            EntityEvent::RemoveMany { ids } => {
                for id in ids {
                    session.evict(&self.entity_type, id);
                }
                session.send(SyncMessage::EntityRemoveMany {
                    entity_name: self.entity_type.clone(),
                    ids: ids.clone(),
                });
            }

            EntityEvent::Patch {
                id, version, patch, ..
            } => {
                if session.needs_delivery(&self.entity_type, id, *version) {
                    session.mark_sent(&self.entity_type, id, *version);
                    session.send(SyncMessage::EntityPatch {
                        entity_name: self.entity_type.clone(),
                        id: id.clone(),
                        version: *version,
                        patch: patch.clone(),
                    });
                }
            }

            EntityEvent::Update { id, version, item } => {
                if session.needs_delivery(&self.entity_type, id, *version) {
                    session.mark_sent(&self.entity_type, id, *version);
                    session.send(SyncMessage::EntityUpdate {
                        entity_name: self.entity_type.clone(),
                        id: id.clone(),
                        version: *version,
                        data: item.clone(),
                    });
                }
            }

            EntityEvent::Remove { id, version } => {
                if session.needs_delivery(&self.entity_type, id, *version) {
                    session.evict(&self.entity_type, id);
                    session.send(SyncMessage::EntityRemove {
                        entity_name: self.entity_type.clone(),
                        id: id.clone(),
                        version: *version,
                    });
                }
            }
        }
    }
}

/// One tracked single-entity snapshot. Releasing (or dropping) the subject
/// gives up the session's interest in the row.
pub struct EntitySubject {
    session: Weak<SyncSession>,
    entity_type: EntityTypeId,
    id: EntityId,
    row: Row,
    version: Version,
    released: AtomicBool,
}

impl EntitySubject {
    pub fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(session) = self.session.upgrade() {
            session.decrease_usage(&self.entity_type, &self.id);
        }
    }
}

impl Drop for EntitySubject {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sayldb_commons::CapturingSink;
    use sayldb_store::{EntityEventBus, EntitySchema, SchemaRegistry};
    use serde_json::json;

    fn setup() -> (Arc<Database>, Arc<CapturingSink>, Arc<SyncSession>) {
        let registry = SchemaRegistry::new();
        registry.register(EntitySchema::new("tasks", "id"));
        let database = Database::new(registry, EntityEventBus::new());
        let sink = Arc::new(CapturingSink::new());
        let session = SyncSession::new(
            SessionId::new("s1"),
            database.clone(),
            sink.clone(),
            LiveSyncConfig::default(),
        );
        (database, sink, session)
    }

    #[tokio::test]
    async fn test_feed_subscription_follows_usage() {
        let (_database, _sink, session) = setup();
        let tasks = EntityTypeId::new("tasks");
        let t1 = EntityId::new("t1");

        assert!(!session.has_feed(&tasks));
        session.increase_usage(&tasks, &t1);
        assert!(session.has_feed(&tasks));

        session.increase_usage(&tasks, &t1);
        session.decrease_usage(&tasks, &t1);
        assert!(session.has_feed(&tasks));

        session.decrease_usage(&tasks, &t1);
        assert!(!session.has_feed(&tasks));
    }

    #[tokio::test]
    async fn test_update_gated_by_version() {
        let (database, sink, session) = setup();
        let tasks = EntityTypeId::new("tasks");
        let t1 = EntityId::new("t1");

        session.increase_usage(&tasks, &t1);
        session.mark_sent(&tasks, &t1, 3);

        let stale = EntityEvent::Update {
            id: t1.clone(),
            version: 3,
            item: Row::from_json(json!({"id": "t1"})),
        };
        database.bus().publish(&tasks, &stale).await;
        assert!(sink.is_empty());

        let fresh = EntityEvent::Update {
            id: t1.clone(),
            version: 4,
            item: Row::from_json(json!({"id": "t1"})),
        };
        database.bus().publish(&tasks, &fresh).await;
        assert_eq!(sink.len(), 1);

        // Redelivery of the same version is gated now
        database.bus().publish(&tasks, &fresh).await;
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_many_bypasses_gate_and_evicts() {
        let (database, sink, session) = setup();
        let tasks = EntityTypeId::new("tasks");
        let a = EntityId::new("a");

        // Only `a` is known to the session
        session.increase_usage(&tasks, &a);
        session.mark_sent(&tasks, &a, 9);

        let event = EntityEvent::RemoveMany {
            ids: vec![a.clone(), EntityId::new("b"), EntityId::new("c")],
        };
        database.bus().publish(&tasks, &event).await;

        // The notification carries all ids regardless of prior knowledge
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            SyncMessage::EntityRemoveMany { ids, .. } => assert_eq!(ids.len(), 3),
            other => panic!("unexpected message {:?}", other),
        }

        // Tracking state for `a` is gone, and with it the type feed
        assert_eq!(session.listeners(&tasks, &a), 0);
        assert!(!session.has_feed(&tasks));
    }

    #[tokio::test]
    async fn test_find_one_tracks_with_forced_sentinel() {
        let (database, sink, session) = setup();
        let tasks = EntityTypeId::new("tasks");

        database
            .insert(&tasks, Row::from_json(json!({"id": "t1", "status": "open"})))
            .await
            .unwrap();

        let subject = session
            .find_one(&tasks, &Filter::eq("id", json!("t1")))
            .await
            .unwrap();
        assert_eq!(subject.version(), 1);
        assert_eq!(session.listeners(&tasks, subject.id()), 1);

        // Any subsequent mutation is delivered even though version 1 was
        // already stored when the snapshot was fetched
        database
            .patch_many(
                &tasks,
                &Filter::eq("id", json!("t1")),
                &Row::from_json(json!({"status": "closed"})),
            )
            .await
            .unwrap();
        assert!(sink
            .messages()
            .iter()
            .any(|m| matches!(m, SyncMessage::EntityPatch { version: 2, .. })));

        subject.release();
        assert_eq!(session.listeners(&tasks, &EntityId::new("t1")), 0);
        assert!(!session.has_feed(&tasks));
    }

    #[tokio::test]
    async fn test_find_one_missing_is_error() {
        let (_database, _sink, session) = setup();
        let result = session
            .find_one(&EntityTypeId::new("tasks"), &Filter::eq("id", json!("nope")))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_destroy_stops_pushes() {
        let (database, sink, session) = setup();
        let tasks = EntityTypeId::new("tasks");
        session.increase_usage(&tasks, &EntityId::new("t1"));
        session.destroy();

        database
            .bus()
            .publish(
                &tasks,
                &EntityEvent::RemoveMany {
                    ids: vec![EntityId::new("t1")],
                },
            )
            .await;
        assert!(sink.is_empty());
        assert!(!session.has_feed(&tasks));
    }
}
