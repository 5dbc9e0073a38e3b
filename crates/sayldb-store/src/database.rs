//! Database facade.
//!
//! Ties together the store, the schema registry and the constraint engine.
//! Mutations go through here so referential side effects are applied in the
//! right order: RESTRICT is checked before anything is touched, the primary
//! mutation runs next, and cascades follow using the keys the mutation
//! actually affected.

use crate::bus::EntityEventBus;
use crate::constraint::VirtualForeignKeyConstraint;
use crate::filter::Filter;
use crate::memory::{MemoryStore, PatchedKey};
use crate::schema::SchemaRegistry;
use crate::store::{ReadOptions, QueryStore, VersionedRow};
use sayldb_commons::{EntityId, EntityTypeId, Result, Row, SaylDbError, Version};
use serde_json::Value;
use std::sync::Arc;

pub struct Database {
    store: Arc<MemoryStore>,
    registry: Arc<SchemaRegistry>,
    constraint: VirtualForeignKeyConstraint,
}

impl Database {
    pub fn new(registry: Arc<SchemaRegistry>, bus: Arc<EntityEventBus>) -> Arc<Self> {
        let store = MemoryStore::new(registry.clone(), bus);
        Arc::new(Self {
            store,
            registry: registry.clone(),
            constraint: VirtualForeignKeyConstraint::new(registry),
        })
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<EntityEventBus> {
        self.store.bus()
    }

    pub async fn insert(&self, entity_type: &EntityTypeId, row: Row) -> Result<()> {
        self.store.insert(entity_type, row).await
    }

    /// Delete every row matching `filter`, then apply referential side
    /// effects. RESTRICT references are checked up front; a single
    /// restricting row fails the whole delete before any row is removed.
    pub async fn delete_many(&self, entity_type: &EntityTypeId, filter: &Filter) -> Result<usize> {
        let keys = self.matching_keys(entity_type, filter).await?;
        self.check_restrict(entity_type, &keys).await?;

        let deleted = self.store.delete_many(entity_type, filter).await?;
        let count = deleted.len();
        self.constraint
            .on_query_delete(&self.store, entity_type, deleted)
            .await?;
        Ok(count)
    }

    /// Patch every row matching `filter`. When the patch touches the
    /// schema's primary key, the resulting renames cascade to referencing
    /// rows.
    pub async fn patch_many(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
        patch: &Row,
    ) -> Result<Vec<PatchedKey>> {
        let schema = self.registry.get(entity_type)?;
        let patched = self.store.patch_many(entity_type, filter, patch).await?;

        if patch.contains_key(&schema.primary_key) {
            self.constraint
                .on_query_patch(&self.store, entity_type, &patched)
                .await?;
        }
        Ok(patched)
    }

    /// Delete specific entities by id, publishing one `Remove` per row, then
    /// cascade. RESTRICT is checked before the first row is removed.
    pub async fn delete_entities(
        &self,
        entity_type: &EntityTypeId,
        ids: &[EntityId],
    ) -> Result<()> {
        let schema = self.registry.get(entity_type)?;

        let mut keys = Vec::with_capacity(ids.len());
        for id in ids {
            let versioned = self.store.get(entity_type, id).ok_or_else(|| {
                SaylDbError::not_found(format!("{}/{}", entity_type, id))
            })?;
            keys.push(
                versioned
                    .row
                    .get(&schema.primary_key)
                    .cloned()
                    .unwrap_or(Value::Null),
            );
        }
        self.check_restrict(entity_type, &keys).await?;

        for id in ids {
            self.store.delete_entity(entity_type, id).await?;
        }
        self.constraint
            .on_uow_delete(&self.store, entity_type, keys)
            .await?;
        Ok(())
    }

    /// Replace the entity stored under `old_id` with `row`. A changed
    /// primary key cascades as a rename into referencing rows.
    pub async fn update_entity(
        &self,
        entity_type: &EntityTypeId,
        old_id: &EntityId,
        row: Row,
    ) -> Result<Version> {
        let schema = self.registry.get(entity_type)?;
        let old_key = self
            .store
            .get(entity_type, old_id)
            .ok_or_else(|| SaylDbError::not_found(format!("{}/{}", entity_type, old_id)))?
            .row
            .get(&schema.primary_key)
            .cloned()
            .unwrap_or(Value::Null);
        let new_key = row
            .get(&schema.primary_key)
            .cloned()
            .unwrap_or_else(|| old_key.clone());

        let version = self.store.update_rekey(entity_type, old_id, row).await?;
        self.constraint
            .on_uow_update(&self.store, entity_type, old_key, new_key)
            .await?;
        Ok(version)
    }

    pub async fn find(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
        options: &ReadOptions,
    ) -> Result<Vec<VersionedRow>> {
        self.store.find(entity_type, filter, options).await
    }

    pub async fn find_one(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
    ) -> Result<Option<VersionedRow>> {
        self.store.find_one(entity_type, filter).await
    }

    pub async fn count(&self, entity_type: &EntityTypeId, filter: &Filter) -> Result<usize> {
        self.store.count(entity_type, filter).await
    }

    async fn matching_keys(
        &self,
        entity_type: &EntityTypeId,
        filter: &Filter,
    ) -> Result<Vec<Value>> {
        let schema = self.registry.get(entity_type)?;
        let options = ReadOptions::new().project(vec![schema.primary_key.clone()]);
        Ok(self
            .store
            .find(entity_type, filter, &options)
            .await?
            .into_iter()
            .map(|versioned| {
                versioned
                    .row
                    .get(&schema.primary_key)
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect())
    }

    async fn check_restrict(&self, entity_type: &EntityTypeId, keys: &[Value]) -> Result<()> {
        for reference in self.registry.restrict_references(entity_type) {
            for key in keys {
                let referencing = self
                    .store
                    .count(&reference.schema.name, &reference.selecting(key))
                    .await?;
                if referencing > 0 {
                    return Err(SaylDbError::conflict(format!(
                        "Cannot delete {}: {} rows of {} reference it via {}",
                        entity_type, referencing, reference.schema.name, reference.property
                    )));
                }
            }
        }
        Ok(())
    }
}
