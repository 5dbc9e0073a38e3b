//! Reactive queries: filters with named parameters fed by sub-queries.
//!
//! A `ReactiveQuery` wraps a filter whose sub-query markers have been
//! replaced by named parameters. Each extracted sub-query becomes a
//! *provider*: a feed-disabled live collection over the referenced entity
//! type, projected to one field. Whenever a provider's membership changes,
//! the parent query's parameter is rewritten to the provider's current
//! projected values and the owning collection re-runs.
//!
//! Providers are frozen once `setup_providers` has run; registering more
//! afterwards, or activating twice, is a programming error surfaced as
//! `InvalidOperation`.

use crate::collection::LiveCollection;
use crate::session::SyncSession;
use parking_lot::Mutex;
use sayldb_commons::{EntityTypeId, Result, SaylDbError};
use sayldb_store::{Filter, ProviderSpec, SubQuery};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

/// Ground predicate plus the field names it references.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub predicate: Filter,
    pub fields: BTreeSet<String>,
}

struct QueryState {
    parameters: BTreeMap<String, Value>,
    /// Parameter values consumed by the most recent `compile`.
    last_used: Option<BTreeMap<String, Value>>,
    activated: bool,
    provider_collections: Vec<Arc<LiveCollection>>,
}

pub struct ReactiveQuery {
    entity_type: EntityTypeId,
    base: Filter,
    providers: Vec<ProviderSpec>,
    state: Mutex<QueryState>,
}

impl ReactiveQuery {
    /// Extract sub-query markers from `filter` into providers. Provider
    /// filters must themselves be ground: nesting sub-queries inside a
    /// provider is rejected.
    pub fn new(entity_type: EntityTypeId, filter: Filter) -> Result<Self> {
        let (base, providers) = filter.extract_sub_queries()?;
        for provider in &providers {
            if provider.filter.contains_sub_query() {
                return Err(SaylDbError::invalid_filter(format!(
                    "Provider {} contains a nested sub-query",
                    provider.name
                )));
            }
        }
        Ok(Self {
            entity_type,
            base,
            providers,
            state: Mutex::new(QueryState {
                parameters: BTreeMap::new(),
                last_used: None,
                activated: false,
                provider_collections: Vec::new(),
            }),
        })
    }

    pub fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name.clone()).collect()
    }

    /// Register an additional provider by hand. Only valid before
    /// activation; the filter may reference it via a `Parameter` node with
    /// the provider's name.
    pub fn provide(
        &mut self,
        field: impl Into<String>,
        query: SubQuery,
    ) -> Result<()> {
        if self.state.lock().activated {
            return Err(SaylDbError::invalid_operation(
                "Cannot register a provider after setup_providers",
            ));
        }
        let field = field.into();
        let name = format!("{}_{}", field, query.projected_field);
        if self.providers.iter().any(|p| p.name == name) {
            return Err(SaylDbError::invalid_filter(format!(
                "Provider with name {} already exists",
                name
            )));
        }
        if query.filter.contains_sub_query() {
            return Err(SaylDbError::invalid_filter(format!(
                "Provider {} contains a nested sub-query",
                name
            )));
        }
        self.providers.push(ProviderSpec {
            name,
            entity_type: query.entity_type,
            filter: *query.filter,
            projected_field: query.projected_field,
        });
        Ok(())
    }

    /// Set a client-driven parameter value.
    pub fn set_parameter(&self, name: impl Into<String>, value: Value) {
        self.state.lock().parameters.insert(name.into(), value);
    }

    pub fn parameter(&self, name: &str) -> Option<Value> {
        self.state.lock().parameters.get(name).cloned()
    }

    /// Open a feed-disabled live collection per provider and wire its
    /// membership changes back into this query's parameters, triggering a
    /// refresh of `owner`. Calling this twice is a programming error.
    pub async fn setup_providers(
        &self,
        session: &Arc<SyncSession>,
        owner: Weak<LiveCollection>,
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.activated {
                return Err(SaylDbError::invalid_operation(
                    "setup_providers called twice",
                ));
            }
            state.activated = true;
        }

        for spec in &self.providers {
            // Boxed to keep the provider's own open future finite: providers
            // are ground queries, so this nests exactly one level.
            let provider: Arc<LiveCollection> = Box::pin(LiveCollection::open_provider(
                session.clone(),
                spec.clone(),
            ))
            .await?;

            let owner = owner.clone();
            let name = spec.name.clone();
            provider.set_watcher(Box::new(move |values| {
                let collection = owner.upgrade()?;
                collection.query().set_parameter(name.clone(), Value::Array(values));
                Some(collection)
            }));

            // Initial parameter value, after the watcher is in place so no
            // change can slip between the two.
            self.set_parameter(spec.name.clone(), Value::Array(provider.projected_values()));

            self.state.lock().provider_collections.push(provider);
        }
        Ok(())
    }

    /// Substitute every parameter with its current value, returning the
    /// ground predicate and its referenced field names. The consumed values
    /// are snapshotted for `parameters_changed`.
    pub fn compile(&self) -> Result<CompiledQuery> {
        let mut state = self.state.lock();
        let mut used = BTreeMap::new();
        let predicate = self.base.resolve_parameters(&state.parameters, &mut used)?;
        state.last_used = Some(used);
        let fields = predicate.referenced_fields();
        Ok(CompiledQuery { predicate, fields })
    }

    /// Whether any parameter consumed by the last compilation has a
    /// different value now. True before the first compilation.
    pub fn parameters_changed(&self) -> bool {
        let state = self.state.lock();
        let Some(last_used) = &state.last_used else {
            return true;
        };
        last_used.iter().any(|(name, used_value)| {
            state.parameters.get(name).unwrap_or(&Value::Null) != used_value
        })
    }

    /// Hand the provider collections to the owner for teardown.
    pub(crate) fn take_provider_collections(&self) -> Vec<Arc<LiveCollection>> {
        std::mem::take(&mut self.state.lock().provider_collections)
    }
}
