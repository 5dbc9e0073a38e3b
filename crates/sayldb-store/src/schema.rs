//! Entity schema metadata and the schema registry.
//!
//! Schemas describe the shape the sync subsystem needs: the primary key
//! field and the reference properties pointing at other entity types,
//! each carrying an on-delete action. The registry indexes schemas by
//! entity type and answers the reverse question the constraint engine
//! asks: "who references this type?"

use crate::filter::Filter;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use sayldb_commons::{EntityTypeId, Result, SaylDbError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// What happens to a referencing row when its referenced row is deleted or
/// has its primary key renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnDeleteAction {
    /// Delete (or re-point, for renames) the referencing row.
    Cascade,
    /// Set the referencing property to null.
    SetNull,
    /// Set the referencing property to the schema-declared default.
    SetDefault,
    /// Refuse the operation if referencing rows exist.
    Restrict,
    /// Do nothing; dangling references are the caller's problem.
    NoAction,
}

impl OnDeleteAction {
    /// Whether this action produces side effects the constraint engine must
    /// apply. RESTRICT is enforced up front, NO ACTION never acts.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OnDeleteAction::Cascade | OnDeleteAction::SetNull | OnDeleteAction::SetDefault
        )
    }
}

/// One reference property: `property` on this schema points at the primary
/// key of `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceProperty {
    pub property: String,
    pub target: EntityTypeId,
    pub on_delete: OnDeleteAction,
    /// Substitute value for SET DEFAULT; null when the schema declares none.
    #[serde(default)]
    pub default_value: Option<Value>,
}

impl ReferenceProperty {
    pub fn new(
        property: impl Into<String>,
        target: impl Into<EntityTypeId>,
        on_delete: OnDeleteAction,
    ) -> Self {
        Self {
            property: property.into(),
            target: target.into(),
            on_delete,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Schema for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub name: EntityTypeId,
    pub primary_key: String,
    #[serde(default)]
    pub references: Vec<ReferenceProperty>,
}

impl EntitySchema {
    pub fn new(name: impl Into<EntityTypeId>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            references: Vec::new(),
        }
    }

    pub fn with_reference(mut self, reference: ReferenceProperty) -> Self {
        self.references.push(reference);
        self
    }
}

/// A reference seen from the referenced side: `schema.property` points at us.
#[derive(Debug, Clone)]
pub struct IncomingReference {
    pub schema: Arc<EntitySchema>,
    pub property: String,
    pub on_delete: OnDeleteAction,
    pub default_value: Option<Value>,
}

impl IncomingReference {
    /// Filter selecting the rows of `self.schema` that point at `key`.
    pub fn selecting(&self, key: &Value) -> Filter {
        Filter::Eq(self.property.clone(), key.clone())
    }
}

struct RegisteredSchema {
    schema: Arc<EntitySchema>,
    /// Incoming references with an active on-delete action, built lazily on
    /// first cascade through this type.
    incoming: OnceCell<Vec<IncomingReference>>,
    /// Incoming RESTRICT references, for the pre-delete check.
    restricting: OnceCell<Vec<IncomingReference>>,
}

/// Registry of all known entity schemas.
pub struct SchemaRegistry {
    schemas: DashMap<EntityTypeId, Arc<RegisteredSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            schemas: DashMap::new(),
        })
    }

    /// Register a schema. Re-registering an entity type replaces the previous
    /// schema and invalidates every cached reverse index.
    pub fn register(&self, schema: EntitySchema) {
        let name = schema.name.clone();
        self.schemas.insert(
            name,
            Arc::new(RegisteredSchema {
                schema: Arc::new(schema),
                incoming: OnceCell::new(),
                restricting: OnceCell::new(),
            }),
        );
        self.invalidate_reverse_indexes();
    }

    pub fn get(&self, entity_type: &EntityTypeId) -> Result<Arc<EntitySchema>> {
        self.schemas
            .get(entity_type)
            .map(|entry| entry.schema.clone())
            .ok_or_else(|| {
                SaylDbError::schema_error(format!("Unknown entity type: {}", entity_type))
            })
    }

    pub fn contains(&self, entity_type: &EntityTypeId) -> bool {
        self.schemas.contains_key(entity_type)
    }

    /// Every registered schema, in no particular order.
    pub fn schemas(&self) -> Vec<Arc<EntitySchema>> {
        self.schemas
            .iter()
            .map(|entry| entry.schema.clone())
            .collect()
    }

    /// Incoming references that the constraint engine must act on (CASCADE,
    /// SET NULL, SET DEFAULT). RESTRICT and NO ACTION are excluded: the
    /// former is enforced before the mutation, the latter never acts.
    pub fn incoming_references(&self, entity_type: &EntityTypeId) -> Vec<IncomingReference> {
        let Some(guard) = self.schemas.get(entity_type) else {
            return Vec::new();
        };
        // Release the map guard before the init closure walks the map again.
        let entry = Arc::clone(&guard);
        drop(guard);
        entry
            .incoming
            .get_or_init(|| self.collect_incoming(entity_type, |action| action.is_active()))
            .clone()
    }

    /// Incoming RESTRICT references, checked before a delete is allowed.
    pub fn restrict_references(&self, entity_type: &EntityTypeId) -> Vec<IncomingReference> {
        let Some(guard) = self.schemas.get(entity_type) else {
            return Vec::new();
        };
        let entry = Arc::clone(&guard);
        drop(guard);
        entry
            .restricting
            .get_or_init(|| {
                self.collect_incoming(entity_type, |action| {
                    matches!(action, OnDeleteAction::Restrict)
                })
            })
            .clone()
    }

    fn collect_incoming(
        &self,
        entity_type: &EntityTypeId,
        select: impl Fn(&OnDeleteAction) -> bool,
    ) -> Vec<IncomingReference> {
        let mut incoming = Vec::new();
        for entry in self.schemas.iter() {
            for reference in &entry.schema.references {
                if &reference.target == entity_type && select(&reference.on_delete) {
                    incoming.push(IncomingReference {
                        schema: entry.schema.clone(),
                        property: reference.property.clone(),
                        on_delete: reference.on_delete.clone(),
                        default_value: reference.default_value.clone(),
                    });
                }
            }
        }
        incoming
    }

    fn invalidate_reverse_indexes(&self) {
        let names: Vec<EntityTypeId> = self.schemas.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some(entry) = self.schemas.get(&name) {
                let schema = entry.schema.clone();
                drop(entry);
                self.schemas.insert(
                    name,
                    Arc::new(RegisteredSchema {
                        schema,
                        incoming: OnceCell::new(),
                        restricting: OnceCell::new(),
                    }),
                );
            }
        }
    }
}
