//! In-memory reference store.
//!
//! Tables live in a `DashMap` of entity type to ordered row map; every
//! mutation bumps the affected row's version and publishes exactly one event
//! per row on the bus (or a single `RemoveMany` for bulk deletes). Events are
//! collected under the table guard and published after it is released, so
//! handlers can issue reads without deadlocking.

use crate::bus::EntityEventBus;
use crate::filter::{sort_values, Filter, SortDirection};
use crate::schema::SchemaRegistry;
use crate::store::{ReadOptions, QueryStore, VersionedRow};
use async_trait::async_trait;
use dashmap::DashMap;
use sayldb_commons::{
    EntityEvent, EntityId, EntityTypeId, Result, Row, SaylDbError, StoreError, Version,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

struct StoredRow {
    row: Row,
    version: Version,
}

/// Old and new primary key of one patched row. The keys are equal unless the
/// patch touched the primary key column.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchedKey {
    pub old_key: Value,
    pub new_key: Value,
}

/// In-memory store with per-row versioning and event publication.
pub struct MemoryStore {
    registry: Arc<SchemaRegistry>,
    bus: Arc<EntityEventBus>,
    tables: DashMap<EntityTypeId, BTreeMap<EntityId, StoredRow>>,
}

impl MemoryStore {
    pub fn new(registry: Arc<SchemaRegistry>, bus: Arc<EntityEventBus>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bus,
            tables: DashMap::new(),
        })
    }

    pub fn bus(&self) -> &Arc<EntityEventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    fn primary_key_of(&self, entity_type: &EntityTypeId, row: &Row) -> Result<Value> {
        let schema = self.registry.get(entity_type)?;
        row.get(&schema.primary_key).cloned().ok_or_else(|| {
            StoreError::MissingPrimaryKey {
                entity_type: entity_type.to_string(),
                key: schema.primary_key.clone(),
            }
            .into()
        })
    }

    /// Insert a new row. Fails if a row with the same primary key exists.
    pub async fn insert(&self, entity_type: &EntityTypeId, row: Row) -> Result<()> {
        let key = self.primary_key_of(entity_type, &row)?;
        let id = EntityId::from_value(&key);

        {
            let mut table = self.tables.entry(entity_type.clone()).or_default();
            if table.contains_key(&id) {
                return Err(SaylDbError::AlreadyExists(format!(
                    "{}/{}",
                    entity_type, id
                )));
            }
            table.insert(
                id.clone(),
                StoredRow {
                    row: row.clone(),
                    version: 1,
                },
            );
        }

        self.bus
            .publish(
                entity_type,
                &EntityEvent::Add {
                    id,
                    version: 1,
                    item: row,
                },
            )
            .await;
        Ok(())
    }

    /// Replace a row in full, keyed by the row's own primary key.
    pub async fn update(&self, entity_type: &EntityTypeId, row: Row) -> Result<Version> {
        let key = self.primary_key_of(entity_type, &row)?;
        self.update_rekey(entity_type, &EntityId::from_value(&key), row)
            .await
    }

    /// Replace the row currently stored under `old_id` with `row`, re-keying
    /// the table entry when the row's primary key differs.
    pub async fn update_rekey(
        &self,
        entity_type: &EntityTypeId,
        old_id: &EntityId,
        row: Row,
    ) -> Result<Version> {
        let key = self.primary_key_of(entity_type, &row)?;
        let new_id = EntityId::from_value(&key);

        let version = {
            let mut table = self
                .tables
                .get_mut(entity_type)
                .ok_or_else(|| self.missing(entity_type, old_id))?;
            let stored = table
                .remove(old_id)
                .ok_or_else(|| self.missing(entity_type, old_id))?;
            let version = stored.version + 1;
            table.insert(
                new_id,
                StoredRow {
                    row: row.clone(),
                    version,
                },
            );
            version
        };

        self.bus
            .publish(
                entity_type,
                &EntityEvent::Update {
                    id: old_id.clone(),
                    version,
                    item: row,
                },
            )
            .await;
        Ok(version)
    }

    /// Apply `patch` to every row matching `filter`. Publishes one `Patch`
    /// event per affected row carrying the diff and the full post-patch row.
    /// Returns the old and new primary key of each patched row.
    pub async fn patch_many(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
        patch: &Row,
    ) -> Result<Vec<PatchedKey>> {
        let schema = self.registry.get(entity_type)?;
        let mut events = Vec::new();
        let mut keys = Vec::new();

        {
            let mut table = match self.tables.get_mut(entity_type) {
                Some(table) => table,
                None => return Ok(Vec::new()),
            };

            let matching: Vec<EntityId> = table
                .iter()
                .filter(|(_, stored)| filter.matches(&stored.row))
                .map(|(id, _)| id.clone())
                .collect();

            // Stage every patched row first so a primary-key collision
            // rejects the whole patch before any row is touched.
            let mut staged = Vec::with_capacity(matching.len());
            let mut target_ids: BTreeSet<EntityId> = BTreeSet::new();
            for id in &matching {
                let stored = table.get(id).ok_or_else(|| self.missing(entity_type, id))?;
                let old_key = stored
                    .row
                    .get(&schema.primary_key)
                    .cloned()
                    .unwrap_or(Value::Null);

                let mut row = stored.row.clone();
                row.apply_patch(patch);
                let version = stored.version + 1;

                let new_key = row
                    .get(&schema.primary_key)
                    .cloned()
                    .unwrap_or_else(|| old_key.clone());
                let new_id = EntityId::from_value(&new_key);

                if new_id != *id {
                    let occupied = table.contains_key(&new_id) && !matching.contains(&new_id);
                    let duplicate = !target_ids.insert(new_id.clone());
                    if occupied || duplicate {
                        return Err(SaylDbError::AlreadyExists(format!(
                            "{}/{}",
                            entity_type, new_id
                        )));
                    }
                }
                staged.push((id.clone(), new_id, old_key, new_key, row, version));
            }

            for (id, new_id, old_key, new_key, row, version) in staged {
                table.remove(&id);
                events.push(EntityEvent::Patch {
                    id,
                    version,
                    patch: patch.clone(),
                    item: row.clone(),
                });
                keys.push(PatchedKey { old_key, new_key });
                table.insert(new_id, StoredRow { row, version });
            }
        }

        for event in events {
            self.bus.publish(entity_type, &event).await;
        }
        Ok(keys)
    }

    /// Delete every row matching `filter`. Publishes a single `RemoveMany`
    /// carrying all removed ids. Returns the primary key values of the
    /// deleted rows in their original JSON type.
    pub async fn delete_many(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
    ) -> Result<Vec<Value>> {
        let schema = self.registry.get(entity_type)?;
        let mut ids = Vec::new();
        let mut keys = Vec::new();

        {
            let mut table = match self.tables.get_mut(entity_type) {
                Some(table) => table,
                None => return Ok(Vec::new()),
            };
            let matching: Vec<EntityId> = table
                .iter()
                .filter(|(_, stored)| filter.matches(&stored.row))
                .map(|(id, _)| id.clone())
                .collect();
            for id in matching {
                if let Some(stored) = table.remove(&id) {
                    keys.push(
                        stored
                            .row
                            .get(&schema.primary_key)
                            .cloned()
                            .unwrap_or(Value::Null),
                    );
                    ids.push(id);
                }
            }
        }

        if !ids.is_empty() {
            self.bus
                .publish(entity_type, &EntityEvent::RemoveMany { ids })
                .await;
        }
        Ok(keys)
    }

    /// Delete a single row by id, publishing an individual `Remove` event.
    pub async fn delete_entity(&self, entity_type: &EntityTypeId, id: &EntityId) -> Result<Row> {
        let (row, version) = {
            let mut table = self
                .tables
                .get_mut(entity_type)
                .ok_or_else(|| self.missing(entity_type, id))?;
            let stored = table
                .remove(id)
                .ok_or_else(|| self.missing(entity_type, id))?;
            (stored.row, stored.version + 1)
        };

        self.bus
            .publish(
                entity_type,
                &EntityEvent::Remove {
                    id: id.clone(),
                    version,
                },
            )
            .await;
        Ok(row)
    }

    /// Fetch one row by id, bypassing filter evaluation.
    pub fn get(&self, entity_type: &EntityTypeId, id: &EntityId) -> Option<VersionedRow> {
        self.tables.get(entity_type).and_then(|table| {
            table.get(id).map(|stored| VersionedRow {
                row: stored.row.clone(),
                version: stored.version,
            })
        })
    }

    fn missing(&self, entity_type: &EntityTypeId, id: &EntityId) -> SaylDbError {
        StoreError::EntityNotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
        .into()
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn find(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
        options: &ReadOptions,
    ) -> Result<Vec<VersionedRow>> {
        let schema = self.registry.get(entity_type)?;

        let mut rows: Vec<VersionedRow> = match self.tables.get(entity_type) {
            Some(table) => table
                .values()
                .filter(|stored| filter.matches(&stored.row))
                .map(|stored| VersionedRow {
                    row: stored.row.clone(),
                    version: stored.version,
                })
                .collect(),
            None => Vec::new(),
        };

        for order in options.sort.iter().rev() {
            rows.sort_by(|a, b| {
                let left = a.row.get(&order.field).unwrap_or(&Value::Null);
                let right = b.row.get(&order.field).unwrap_or(&Value::Null);
                let ordering = sort_values(left, right);
                match order.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let rows: Vec<VersionedRow> = rows
            .into_iter()
            .skip(options.skip)
            .take(if options.limit == 0 {
                usize::MAX
            } else {
                options.limit
            })
            .collect();

        if let Some(projection) = &options.projection {
            // The primary key always travels with projected rows
            let mut fields = projection.clone();
            if !fields.contains(&schema.primary_key) {
                fields.push(schema.primary_key.clone());
            }
            return Ok(rows
                .into_iter()
                .map(|versioned| VersionedRow {
                    row: versioned.row.project(&fields),
                    version: versioned.version,
                })
                .collect());
        }

        Ok(rows)
    }

    async fn count(&self, entity_type: &EntityTypeId, filter: &Filter) -> Result<usize> {
        self.registry.get(entity_type)?;
        Ok(self
            .tables
            .get(entity_type)
            .map(|table| {
                table
                    .values()
                    .filter(|stored| filter.matches(&stored.row))
                    .count()
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SortOrder;
    use crate::schema::EntitySchema;
    use serde_json::json;

    fn store() -> Arc<MemoryStore> {
        let registry = SchemaRegistry::new();
        registry.register(EntitySchema::new("tasks", "id"));
        MemoryStore::new(registry, EntityEventBus::new())
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = store();
        let tasks = EntityTypeId::new("tasks");
        store
            .insert(&tasks, Row::from_json(json!({"id": "t1", "status": "open"})))
            .await
            .unwrap();

        let rows = store
            .find(&tasks, &Filter::All, &ReadOptions::new())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, 1);
        assert_eq!(rows[0].row.get("status"), Some(&json!("open")));
    }

    #[tokio::test]
    async fn test_duplicate_insert_rejected() {
        let store = store();
        let tasks = EntityTypeId::new("tasks");
        store
            .insert(&tasks, Row::from_json(json!({"id": "t1"})))
            .await
            .unwrap();
        let err = store
            .insert(&tasks, Row::from_json(json!({"id": "t1"})))
            .await
            .unwrap_err();
        assert!(matches!(err, SaylDbError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_missing_primary_key() {
        let store = store();
        let err = store
            .insert(&EntityTypeId::new("tasks"), Row::from_json(json!({"x": 1})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SaylDbError::Store(StoreError::MissingPrimaryKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_patch_bumps_version_and_rekeys_on_pk_change() {
        let store = store();
        let tasks = EntityTypeId::new("tasks");
        store
            .insert(&tasks, Row::from_json(json!({"id": "t1", "status": "open"})))
            .await
            .unwrap();

        let keys = store
            .patch_many(
                &tasks,
                &Filter::eq("id", json!("t1")),
                &Row::from_json(json!({"id": "t2"})),
            )
            .await
            .unwrap();

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].old_key, json!("t1"));
        assert_eq!(keys[0].new_key, json!("t2"));

        assert!(store.get(&tasks, &EntityId::new("t1")).is_none());
        let moved = store.get(&tasks, &EntityId::new("t2")).unwrap();
        assert_eq!(moved.version, 2);
        assert_eq!(moved.row.get("status"), Some(&json!("open")));
    }

    #[tokio::test]
    async fn test_rekey_onto_existing_row_is_rejected() {
        let store = store();
        let tasks = EntityTypeId::new("tasks");
        for id in ["t1", "t2"] {
            store
                .insert(&tasks, Row::from_json(json!({"id": id, "status": "open"})))
                .await
                .unwrap();
        }

        let err = store
            .patch_many(
                &tasks,
                &Filter::eq("id", json!("t1")),
                &Row::from_json(json!({"id": "t2"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SaylDbError::AlreadyExists(_)));

        // Nothing was applied: both rows intact at their original version
        assert_eq!(store.get(&tasks, &EntityId::new("t1")).unwrap().version, 1);
        assert_eq!(store.get(&tasks, &EntityId::new("t2")).unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_delete_many_returns_original_key_values() {
        let registry = SchemaRegistry::new();
        registry.register(EntitySchema::new("tasks", "id"));
        let store = MemoryStore::new(registry, EntityEventBus::new());
        let tasks = EntityTypeId::new("tasks");

        store
            .insert(&tasks, Row::from_json(json!({"id": 42, "status": "open"})))
            .await
            .unwrap();
        let keys = store.delete_many(&tasks, &Filter::All).await.unwrap();
        // Numeric keys survive as numbers, not as their string rendering
        assert_eq!(keys, vec![json!(42)]);
    }

    #[tokio::test]
    async fn test_sort_skip_limit_projection() {
        let store = store();
        let tasks = EntityTypeId::new("tasks");
        for (id, rank) in [("a", 3), ("b", 1), ("c", 2)] {
            store
                .insert(
                    &tasks,
                    Row::from_json(json!({"id": id, "rank": rank, "title": "x"})),
                )
                .await
                .unwrap();
        }

        let options = ReadOptions::new()
            .sort(vec![SortOrder::asc("rank")])
            .page(1, 1)
            .project(vec!["rank".to_string()]);
        let rows = store.find(&tasks, &Filter::All, &options).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.get("rank"), Some(&json!(2)));
        // Projection keeps the primary key even when not requested
        assert_eq!(rows[0].row.get("id"), Some(&json!("c")));
        assert!(rows[0].row.get("title").is_none());
    }

    #[tokio::test]
    async fn test_count() {
        let store = store();
        let tasks = EntityTypeId::new("tasks");
        for id in ["a", "b"] {
            store
                .insert(&tasks, Row::from_json(json!({"id": id, "open": true})))
                .await
                .unwrap();
        }
        store
            .insert(&tasks, Row::from_json(json!({"id": "c", "open": false})))
            .await
            .unwrap();
        assert_eq!(
            store
                .count(&tasks, &Filter::eq("open", json!(true)))
                .await
                .unwrap(),
            2
        );
    }
}
