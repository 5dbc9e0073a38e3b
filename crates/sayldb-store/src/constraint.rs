//! Virtual foreign key constraints.
//!
//! Backends without native foreign keys still need referential side effects:
//! deleting a referenced row must CASCADE / SET NULL / SET DEFAULT into the
//! rows pointing at it, and renaming a primary key must re-point (or clear)
//! those rows. This engine applies the side effects through the store's
//! regular mutation paths, so every cascaded change publishes ordinary
//! entity events and flows to live sessions like any other write.
//!
//! Cascades are driven by an iterative worklist rather than recursion: each
//! applied side effect may enqueue follow-up operations (a cascaded delete
//! into a type that is itself referenced, a re-pointed column that happens to
//! be the dependent's own primary key). Cycles terminate because deletes
//! remove rows and renames converge on the final key value.

use crate::filter::values_equal;
use crate::memory::{MemoryStore, PatchedKey};
use crate::schema::{OnDeleteAction, SchemaRegistry};
use log::debug;
use sayldb_commons::{EntityTypeId, Result, Row};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;

enum CascadeOp {
    /// Rows of `entity_type` with these primary keys were deleted.
    Delete {
        entity_type: EntityTypeId,
        keys: Vec<Value>,
    },
    /// A row of `entity_type` had its primary key renamed.
    Rename {
        entity_type: EntityTypeId,
        old_key: Value,
        new_key: Value,
    },
}

/// Applies referential side effects for schemas with reference properties.
pub struct VirtualForeignKeyConstraint {
    registry: Arc<SchemaRegistry>,
}

impl VirtualForeignKeyConstraint {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Side effects of a filter-based bulk delete.
    pub async fn on_query_delete(
        &self,
        store: &MemoryStore,
        entity_type: &EntityTypeId,
        deleted_keys: Vec<Value>,
    ) -> Result<()> {
        self.run(
            store,
            vec![CascadeOp::Delete {
                entity_type: entity_type.clone(),
                keys: deleted_keys,
            }],
        )
        .await
    }

    /// Side effects of a filter-based patch that touched the patched
    /// schema's primary key. `patched` pairs the old and new key of every
    /// affected row; unchanged pairs are ignored.
    pub async fn on_query_patch(
        &self,
        store: &MemoryStore,
        entity_type: &EntityTypeId,
        patched: &[PatchedKey],
    ) -> Result<()> {
        let ops = renames(entity_type, patched);
        if ops.is_empty() {
            return Ok(());
        }
        self.run(store, ops).await
    }

    /// Side effects of unit-of-work entity deletes.
    pub async fn on_uow_delete(
        &self,
        store: &MemoryStore,
        entity_type: &EntityTypeId,
        deleted_keys: Vec<Value>,
    ) -> Result<()> {
        self.on_query_delete(store, entity_type, deleted_keys).await
    }

    /// Side effects of a unit-of-work update that renamed a primary key.
    pub async fn on_uow_update(
        &self,
        store: &MemoryStore,
        entity_type: &EntityTypeId,
        old_key: Value,
        new_key: Value,
    ) -> Result<()> {
        if values_equal(&old_key, &new_key) {
            return Ok(());
        }
        self.run(
            store,
            vec![CascadeOp::Rename {
                entity_type: entity_type.clone(),
                old_key,
                new_key,
            }],
        )
        .await
    }

    async fn run(&self, store: &MemoryStore, initial: Vec<CascadeOp>) -> Result<()> {
        let mut worklist: VecDeque<CascadeOp> = initial.into();

        while let Some(op) = worklist.pop_front() {
            match op {
                CascadeOp::Delete { entity_type, keys } => {
                    if keys.is_empty() {
                        continue;
                    }
                    for reference in self.registry.incoming_references(&entity_type) {
                        for key in &keys {
                            let filter = reference.selecting(key);
                            match reference.on_delete {
                                OnDeleteAction::Cascade => {
                                    let deleted = store
                                        .delete_many(&reference.schema.name, &filter)
                                        .await?;
                                    if !deleted.is_empty() {
                                        debug!(
                                            "Cascade delete: {} rows of {} referenced {}",
                                            deleted.len(),
                                            reference.schema.name,
                                            entity_type
                                        );
                                        worklist.push_back(CascadeOp::Delete {
                                            entity_type: reference.schema.name.clone(),
                                            keys: deleted,
                                        });
                                    }
                                }
                                OnDeleteAction::SetNull | OnDeleteAction::SetDefault => {
                                    let mut patch = Row::default();
                                    patch.set(
                                        reference.property.clone(),
                                        substitute(&reference.on_delete, &reference.default_value),
                                    );
                                    let patched = store
                                        .patch_many(&reference.schema.name, &filter, &patch)
                                        .await?;
                                    worklist.extend(renames(&reference.schema.name, &patched));
                                }
                                OnDeleteAction::Restrict | OnDeleteAction::NoAction => {}
                            }
                        }
                    }
                }
                CascadeOp::Rename {
                    entity_type,
                    old_key,
                    new_key,
                } => {
                    for reference in self.registry.incoming_references(&entity_type) {
                        let filter = reference.selecting(&old_key);
                        let value = match reference.on_delete {
                            OnDeleteAction::Cascade => new_key.clone(),
                            OnDeleteAction::SetNull | OnDeleteAction::SetDefault => {
                                substitute(&reference.on_delete, &reference.default_value)
                            }
                            OnDeleteAction::Restrict | OnDeleteAction::NoAction => continue,
                        };
                        let mut patch = Row::default();
                        patch.set(reference.property.clone(), value);
                        let patched = store
                            .patch_many(&reference.schema.name, &filter, &patch)
                            .await?;
                        // Re-pointing a column that is the dependent's own
                        // primary key renames the dependent too.
                        worklist.extend(renames(&reference.schema.name, &patched));
                    }
                }
            }
        }
        Ok(())
    }
}

fn substitute(action: &OnDeleteAction, default_value: &Option<Value>) -> Value {
    match action {
        OnDeleteAction::SetDefault => default_value.clone().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn renames(entity_type: &EntityTypeId, patched: &[PatchedKey]) -> Vec<CascadeOp> {
    patched
        .iter()
        .filter(|pair| !values_equal(&pair.old_key, &pair.new_key))
        .map(|pair| CascadeOp::Rename {
            entity_type: entity_type.clone(),
            old_key: pair.old_key.clone(),
            new_key: pair.new_key.clone(),
        })
        .collect()
}
