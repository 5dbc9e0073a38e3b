//! Referential integrity across the database facade: cascades, SET NULL /
//! SET DEFAULT substitution and rename propagation through chained
//! references.

use async_trait::async_trait;
use parking_lot::Mutex;
use sayldb_commons::{EntityEvent, EntityId, EntityTypeId, Row};
use sayldb_store::{
    Database, EntityEventBus, EntityEventHandler, EntitySchema, Filter, OnDeleteAction,
    ReferenceProperty, SchemaRegistry,
};
use serde_json::json;
use std::sync::Arc;

fn users() -> EntityTypeId {
    EntityTypeId::new("users")
}

fn tasks() -> EntityTypeId {
    EntityTypeId::new("tasks")
}

/// Records every event published for one entity type.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<EntityEvent>>,
}

#[async_trait]
impl EntityEventHandler for Recorder {
    async fn on_event(&self, event: &EntityEvent) {
        self.events.lock().push(event.clone());
    }
}

async fn seed_user_with_task(db: &Database) {
    db.insert(&users(), Row::from_json(json!({"id": "u1", "name": "Alice"})))
        .await
        .unwrap();
    db.insert(
        &tasks(),
        Row::from_json(json!({"id": "t1", "assignee": "u1", "status": "open"})),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_set_null_on_delete() {
    let registry = SchemaRegistry::new();
    registry.register(EntitySchema::new("users", "id"));
    registry.register(EntitySchema::new("tasks", "id").with_reference(
        ReferenceProperty::new("assignee", "users", OnDeleteAction::SetNull),
    ));
    let db = Database::new(registry, EntityEventBus::new());
    seed_user_with_task(&db).await;

    db.delete_many(&users(), &Filter::eq("id", json!("u1")))
        .await
        .unwrap();

    let task = db
        .find_one(&tasks(), &Filter::eq("id", json!("t1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.row.get("assignee"), Some(&json!(null)));
    // The rest of the row is untouched
    assert_eq!(task.row.get("status"), Some(&json!("open")));
}

#[tokio::test]
async fn test_set_default_on_delete() {
    let registry = SchemaRegistry::new();
    registry.register(EntitySchema::new("users", "id"));
    registry.register(EntitySchema::new("tasks", "id").with_reference(
        ReferenceProperty::new("assignee", "users", OnDeleteAction::SetDefault)
            .with_default(json!("unassigned")),
    ));
    let db = Database::new(registry, EntityEventBus::new());
    seed_user_with_task(&db).await;

    db.delete_many(&users(), &Filter::eq("id", json!("u1")))
        .await
        .unwrap();

    let task = db
        .find_one(&tasks(), &Filter::eq("id", json!("t1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.row.get("assignee"), Some(&json!("unassigned")));
}

#[tokio::test]
async fn test_mixed_actions_fan_out_from_one_delete() {
    let registry = SchemaRegistry::new();
    registry.register(EntitySchema::new("users", "id"));
    registry.register(EntitySchema::new("tasks", "id").with_reference(
        ReferenceProperty::new("assignee", "users", OnDeleteAction::Cascade),
    ));
    registry.register(EntitySchema::new("notes", "id").with_reference(
        ReferenceProperty::new("author", "users", OnDeleteAction::SetNull),
    ));
    registry.register(EntitySchema::new("audit", "id").with_reference(
        ReferenceProperty::new("actor", "users", OnDeleteAction::NoAction),
    ));
    let db = Database::new(registry, EntityEventBus::new());
    let notes = EntityTypeId::new("notes");
    let audit = EntityTypeId::new("audit");

    seed_user_with_task(&db).await;
    db.insert(&notes, Row::from_json(json!({"id": "n1", "author": "u1"})))
        .await
        .unwrap();
    db.insert(&audit, Row::from_json(json!({"id": "a1", "actor": "u1"})))
        .await
        .unwrap();

    db.delete_many(&users(), &Filter::eq("id", json!("u1")))
        .await
        .unwrap();

    assert_eq!(db.count(&tasks(), &Filter::All).await.unwrap(), 0);
    let note = db
        .find_one(&notes, &Filter::eq("id", json!("n1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note.row.get("author"), Some(&json!(null)));
    // NO ACTION leaves the dangling reference in place
    let entry = db
        .find_one(&audit, &Filter::eq("id", json!("a1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.row.get("actor"), Some(&json!("u1")));
}

#[tokio::test]
async fn test_cascade_delete_publishes_remove_events() {
    let registry = SchemaRegistry::new();
    registry.register(EntitySchema::new("users", "id"));
    registry.register(EntitySchema::new("tasks", "id").with_reference(
        ReferenceProperty::new("assignee", "users", OnDeleteAction::Cascade),
    ));
    let bus = EntityEventBus::new();
    let db = Database::new(registry, bus.clone());
    seed_user_with_task(&db).await;

    let recorder = Arc::new(Recorder::default());
    let _subscription = bus.subscribe(tasks(), recorder.clone());

    db.delete_many(&users(), &Filter::eq("id", json!("u1")))
        .await
        .unwrap();

    // The cascaded delete is announced on the referencing type's feed
    let events = recorder.events.lock();
    assert!(events.iter().any(|event| matches!(
        event,
        EntityEvent::RemoveMany { ids } if ids == &vec![EntityId::new("t1")]
    )));
}

#[tokio::test]
async fn test_rename_ripples_through_dependent_primary_key() {
    // memberships key on the referencing property itself, so a user rename
    // renames membership rows, which in turn re-points badges
    let registry = SchemaRegistry::new();
    registry.register(EntitySchema::new("users", "id"));
    registry.register(EntitySchema::new("memberships", "user_id").with_reference(
        ReferenceProperty::new("user_id", "users", OnDeleteAction::Cascade),
    ));
    registry.register(EntitySchema::new("badges", "id").with_reference(
        ReferenceProperty::new("membership", "memberships", OnDeleteAction::Cascade),
    ));
    let db = Database::new(registry, EntityEventBus::new());
    let memberships = EntityTypeId::new("memberships");
    let badges = EntityTypeId::new("badges");

    db.insert(&users(), Row::from_json(json!({"id": "u1"})))
        .await
        .unwrap();
    db.insert(
        &memberships,
        Row::from_json(json!({"user_id": "u1", "role": "admin"})),
    )
    .await
    .unwrap();
    db.insert(
        &badges,
        Row::from_json(json!({"id": "b1", "membership": "u1"})),
    )
    .await
    .unwrap();

    db.patch_many(
        &users(),
        &Filter::eq("id", json!("u1")),
        &Row::from_json(json!({"id": "u9"})),
    )
    .await
    .unwrap();

    let membership = db
        .find_one(&memberships, &Filter::eq("role", json!("admin")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(membership.row.get("user_id"), Some(&json!("u9")));

    let badge = db
        .find_one(&badges, &Filter::eq("id", json!("b1")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(badge.row.get("membership"), Some(&json!("u9")));
}

#[tokio::test]
async fn test_cascade_matches_numeric_keys_exactly() {
    let registry = SchemaRegistry::new();
    registry.register(EntitySchema::new("users", "id"));
    registry.register(EntitySchema::new("tasks", "id").with_reference(
        ReferenceProperty::new("assignee", "users", OnDeleteAction::Cascade),
    ));
    let db = Database::new(registry, EntityEventBus::new());

    db.insert(&users(), Row::from_json(json!({"id": 1})))
        .await
        .unwrap();
    db.insert(&users(), Row::from_json(json!({"id": 2})))
        .await
        .unwrap();
    db.insert(&tasks(), Row::from_json(json!({"id": 10, "assignee": 1})))
        .await
        .unwrap();
    db.insert(&tasks(), Row::from_json(json!({"id": 11, "assignee": 2})))
        .await
        .unwrap();

    db.delete_many(&users(), &Filter::eq("id", json!(1)))
        .await
        .unwrap();

    // Only tasks pointing at the deleted numeric key are gone
    assert_eq!(db.count(&tasks(), &Filter::All).await.unwrap(), 1);
    let survivor = db
        .find_one(&tasks(), &Filter::All)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.row.get("id"), Some(&json!(11)));
}
