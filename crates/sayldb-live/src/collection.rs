//! Live collections: materialized, paginated result sets kept in sync with
//! the store through the entity event bus.
//!
//! A collection's known ids always equal the ids satisfying the current
//! compiled predicate, restricted to the active page when pagination is on.
//! Incremental membership transitions are applied directly from feed events
//! where that is safe; anything that could re-rank a page (adds, removes and
//! membership flips under pagination, provider-driven parameter changes)
//! funnels into `update_collection`, the serialized full re-query.
//!
//! `update_collection` runs under a per-collection async lock. Feed-triggered
//! refreshes carry a generation stamp: a trigger that finds a newer stamp
//! queued behind it skips its own run, so a burst of N triggers coalesces
//! into at most one follow-up instead of N sequential re-queries.

use crate::reactive::{CompiledQuery, ReactiveQuery};
use crate::session::SyncSession;
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use sayldb_commons::{
    CollectionId, EntityEvent, EntityId, EntityTypeId, Result, Row, SyncMessage, Version,
};
use sayldb_store::{
    EntityEventHandler, EntitySubscription, FieldSubscription, Filter, ProviderSpec, ReadOptions,
    SortDirection, SortOrder, VersionedRow,
};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Invoked after a provider collection's membership (or projected values)
/// change; returns the owning collection that must re-run its query.
pub(crate) type ProviderWatcher =
    Box<dyn Fn(Vec<Value>) -> Option<Arc<LiveCollection>> + Send + Sync>;

/// Fluent query builder; `find` opens the live collection.
#[derive(Debug, Clone)]
pub struct FindOptions {
    entity_type: EntityTypeId,
    filter: Filter,
    fields: Option<Vec<String>>,
    parameters: BTreeMap<String, Value>,
    page: usize,
    items_per_page: usize,
    sort: Vec<SortOrder>,
    paginate: bool,
    change_feed: bool,
}

impl FindOptions {
    pub fn new(entity_type: impl Into<EntityTypeId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            filter: Filter::All,
            fields: None,
            parameters: BTreeMap::new(),
            page: 1,
            items_per_page: 0,
            sort: Vec::new(),
            paginate: false,
            change_feed: true,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Project results to these fields. The primary key always travels
    /// along.
    pub fn fields(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn parameter(mut self, name: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = page.max(1);
        self.paginate = true;
        self
    }

    pub fn items_per_page(mut self, items_per_page: usize) -> Self {
        self.items_per_page = items_per_page;
        self.paginate = true;
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(SortOrder {
            field: field.into(),
            direction,
        });
        self.paginate = true;
        self
    }

    pub fn enable_pagination(mut self) -> Self {
        self.paginate = true;
        self
    }

    /// Maintain membership without tracking per-entity updates or pushing to
    /// the client. Used internally for provider collections.
    pub fn disable_change_feed(mut self) -> Self {
        self.change_feed = false;
        self
    }

    pub async fn find(self, session: &Arc<SyncSession>) -> Result<Arc<LiveCollection>> {
        LiveCollection::open(session.clone(), self, None).await
    }
}

struct PaginationState {
    active: bool,
    page: usize,
    items_per_page: usize,
    sort: Vec<SortOrder>,
    total: usize,
    applied_hash: Option<String>,
}

impl PaginationState {
    fn paging_hash(&self) -> String {
        serde_json::to_string(&(self.page, self.items_per_page, &self.sort)).unwrap_or_default()
    }
}

#[derive(Default)]
struct KnownState {
    order: Vec<EntityId>,
    items: BTreeMap<EntityId, Row>,
}

pub struct LiveCollection {
    id: CollectionId,
    entity_type: EntityTypeId,
    primary_key: String,
    session: Arc<SyncSession>,
    query: ReactiveQuery,
    change_feed: bool,
    fields: Option<Vec<String>>,
    /// Set for provider collections; the single field whose values feed the
    /// parent query's parameter.
    projected_field: Option<String>,
    pagination: Mutex<PaginationState>,
    compiled: Mutex<CompiledQuery>,
    known: Mutex<KnownState>,
    watcher: Mutex<Option<ProviderWatcher>>,
    feed: Mutex<Option<EntitySubscription>>,
    field_feed: Mutex<Option<FieldSubscription>>,
    update_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    closed: AtomicBool,
    created_at_ms: i64,
    /// Handed to the feed handler; events arriving after the last strong
    /// reference is gone fall into the void.
    self_ref: Weak<LiveCollection>,
}

impl LiveCollection {
    async fn open(
        session: Arc<SyncSession>,
        options: FindOptions,
        projected_field: Option<String>,
    ) -> Result<Arc<Self>> {
        let schema = session.database().registry().get(&options.entity_type)?;
        let query = ReactiveQuery::new(options.entity_type.clone(), options.filter)?;
        for (name, value) in options.parameters {
            query.set_parameter(name, value);
        }

        let config = session.config();
        let items_per_page = if options.items_per_page == 0 {
            config.default_items_per_page
        } else {
            options.items_per_page
        };
        let mut sort = options.sort;
        sort.truncate(config.max_sort_fields);

        let collection = Arc::new_cyclic(|self_ref| Self {
            id: CollectionId::next(),
            entity_type: options.entity_type,
            primary_key: schema.primary_key.clone(),
            session: session.clone(),
            query,
            change_feed: options.change_feed,
            fields: options.fields,
            projected_field,
            pagination: Mutex::new(PaginationState {
                active: options.paginate,
                page: options.page,
                items_per_page,
                sort,
                total: 0,
                applied_hash: None,
            }),
            compiled: Mutex::new(CompiledQuery {
                predicate: Filter::All,
                fields: BTreeSet::new(),
            }),
            known: Mutex::new(KnownState::default()),
            watcher: Mutex::new(None),
            feed: Mutex::new(None),
            field_feed: Mutex::new(None),
            update_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
            self_ref: self_ref.clone(),
        });

        collection
            .query
            .setup_providers(&session, Arc::downgrade(&collection))
            .await?;
        collection.initial_load().await?;
        Ok(collection)
    }

    /// Open the feed-disabled, single-field collection backing one provider.
    pub(crate) async fn open_provider(
        session: Arc<SyncSession>,
        spec: ProviderSpec,
    ) -> Result<Arc<Self>> {
        let options = FindOptions::new(spec.entity_type)
            .filter(spec.filter)
            .fields(vec![spec.projected_field.clone()])
            .disable_change_feed();
        Self::open(session, options, Some(spec.projected_field)).await
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn entity_type(&self) -> &EntityTypeId {
        &self.entity_type
    }

    pub fn query(&self) -> &ReactiveQuery {
        &self.query
    }

    pub fn created_at_ms(&self) -> i64 {
        self.created_at_ms
    }

    pub fn len(&self) -> usize {
        self.known.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.lock().order.is_empty()
    }

    pub fn known_ids(&self) -> Vec<EntityId> {
        self.known.lock().order.clone()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.known.lock().items.contains_key(id)
    }

    pub fn item(&self, id: &EntityId) -> Option<Row> {
        self.known.lock().items.get(id).cloned()
    }

    pub fn total(&self) -> usize {
        self.pagination.lock().total
    }

    pub fn is_paginated(&self) -> bool {
        self.pagination.lock().active
    }

    /// Current values of the projected field, in collection order. Empty for
    /// non-provider collections.
    pub fn projected_values(&self) -> Vec<Value> {
        let Some(field) = &self.projected_field else {
            return Vec::new();
        };
        let known = self.known.lock();
        known
            .order
            .iter()
            .filter_map(|id| known.items.get(id))
            .filter_map(|row| row.get(field).cloned())
            .collect()
    }

    pub(crate) fn set_watcher(&self, watcher: ProviderWatcher) {
        *self.watcher.lock() = Some(watcher);
    }

    // -- client-driven pagination and parameters ---------------------------

    pub fn set_page(&self, page: usize) {
        let mut pagination = self.pagination.lock();
        pagination.page = page.max(1);
        pagination.active = true;
    }

    pub fn set_items_per_page(&self, items_per_page: usize) {
        let mut pagination = self.pagination.lock();
        pagination.items_per_page = items_per_page;
        pagination.active = true;
    }

    pub fn set_sort(&self, sort: Vec<SortOrder>) {
        let mut pagination = self.pagination.lock();
        pagination.sort = sort;
        pagination
            .sort
            .truncate(self.session.config().max_sort_fields);
        pagination.active = true;
    }

    /// Set a client-driven parameter. Does not activate pagination.
    pub fn set_parameter(&self, name: impl Into<String>, value: Value) {
        self.query.set_parameter(name, value);
    }

    /// Apply pending client-driven pagination/parameter changes. Re-queries
    /// only when the paging hash or an actually-consumed parameter value
    /// differs from the last applied state.
    pub async fn apply(&self) -> Result<()> {
        let paging_changed = {
            let pagination = self.pagination.lock();
            pagination.applied_hash.as_deref() != Some(pagination.paging_hash().as_str())
        };
        if paging_changed || self.query.parameters_changed() {
            self.update_collection(false).await
        } else {
            Ok(())
        }
    }

    // -- lifecycle ---------------------------------------------------------

    async fn initial_load(&self) -> Result<()> {
        let compiled = self.query.compile()?;
        self.register_feeds(&compiled);
        *self.compiled.lock() = compiled.clone();

        let database = self.session.database();
        let (options, active) = self.read_options(self.fetch_projection());
        let rows = database
            .find(&self.entity_type, &compiled.predicate, &options)
            .await?;
        let total = if active {
            database.count(&self.entity_type, &compiled.predicate).await?
        } else {
            rows.len()
        };

        let mut items = Vec::with_capacity(rows.len());
        {
            let mut known = self.known.lock();
            for versioned in rows {
                let id = self.id_of(&versioned.row);
                if self.change_feed {
                    self.session.increase_usage(&self.entity_type, &id);
                    self.session
                        .mark_sent(&self.entity_type, &id, versioned.version);
                }
                known.order.push(id.clone());
                known.items.insert(id, versioned.row.clone());
                items.push(versioned.row);
            }
        }
        {
            let mut pagination = self.pagination.lock();
            pagination.total = total;
            pagination.applied_hash = Some(pagination.paging_hash());
        }
        if self.change_feed {
            self.session.send(SyncMessage::CollectionSet {
                collection: self.id,
                items,
                total,
            });
        }
        Ok(())
    }

    /// Serialized full re-query. `database_changed` marks feed-triggered
    /// refreshes, which coalesce: a run that finds a newer trigger stamped
    /// behind it yields to that one.
    pub async fn update_collection(&self, database_changed: bool) -> Result<()> {
        if self.closed() {
            return Ok(());
        }
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = self.update_lock.lock().await;
        if database_changed && self.generation.load(Ordering::SeqCst) != my_generation {
            return Ok(());
        }
        if self.closed() {
            return Ok(());
        }

        let compiled = self.query.compile()?;
        {
            let mut current = self.compiled.lock();
            if current.fields != compiled.fields {
                drop(current);
                self.register_field_hint(&compiled);
                current = self.compiled.lock();
            }
            *current = compiled.clone();
        }

        let database = self.session.database();
        let total = database
            .count(&self.entity_type, &compiled.predicate)
            .await?;
        let (options, _active) =
            self.read_options(Some(vec![self.primary_key.clone()]));
        let page_rows = database
            .find(&self.entity_type, &compiled.predicate, &options)
            .await?;

        let fresh: Vec<(EntityId, Value)> = page_rows
            .iter()
            .map(|versioned| {
                let key = versioned
                    .row
                    .get(&self.primary_key)
                    .cloned()
                    .unwrap_or(Value::Null);
                (EntityId::from_value(&key), key)
            })
            .collect();
        let fresh_ids: BTreeSet<EntityId> = fresh.iter().map(|(id, _)| id.clone()).collect();
        let previous: BTreeSet<EntityId> =
            self.known.lock().items.keys().cloned().collect();

        let removed: Vec<EntityId> = previous.difference(&fresh_ids).cloned().collect();
        let mut added: Vec<(EntityId, Row, Version)> = Vec::new();
        let mut missing: BTreeSet<EntityId> = BTreeSet::new();
        for (id, key) in &fresh {
            if previous.contains(id) {
                continue;
            }
            match self.refetch(key).await? {
                Some(versioned) => added.push((id.clone(), versioned.row, versioned.version)),
                None => {
                    warn!(
                        "Collection {}: row {}/{} vanished during refetch, skipping",
                        self.id, self.entity_type, id
                    );
                    missing.insert(id.clone());
                }
            }
        }

        if self.closed() {
            return Ok(());
        }

        let order: Vec<EntityId> = fresh
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| !missing.contains(id))
            .collect();
        {
            let mut known = self.known.lock();
            for id in &removed {
                known.items.remove(id);
            }
            for (id, row, _) in &added {
                known.items.insert(id.clone(), row.clone());
            }
            known.order = order.clone();
        }

        if self.change_feed {
            for id in &removed {
                self.session.decrease_usage(&self.entity_type, id);
            }
            for (id, _, version) in &added {
                self.session.increase_usage(&self.entity_type, id);
                self.session.mark_sent(&self.entity_type, id, *version);
            }
            if !removed.is_empty() {
                self.session.send(SyncMessage::CollectionRemoveMany {
                    collection: self.id,
                    ids: removed.clone(),
                });
            }
            for (_, row, _) in &added {
                self.session.send(SyncMessage::CollectionAdd {
                    collection: self.id,
                    item: row.clone(),
                });
            }
            self.session.send(SyncMessage::CollectionSort {
                collection: self.id,
                ids: order,
            });
        }

        let total_changed = {
            let mut pagination = self.pagination.lock();
            let changed = pagination.total != total;
            pagination.total = total;
            pagination.applied_hash = Some(pagination.paging_hash());
            changed
        };
        if self.change_feed && total_changed {
            self.session.send(SyncMessage::CollectionTotal {
                collection: self.id,
                total,
            });
        }

        if !added.is_empty() || !removed.is_empty() {
            self.notify_watcher().await;
        }
        Ok(())
    }

    /// Stop tracking: disable pushes, drop feed subscriptions, tear down
    /// provider collections and give up usage for every known id. An
    /// in-flight re-query observes the closed flag and discards its result.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing collection {} ({})", self.id, self.entity_type);
        *self.feed.lock() = None;
        *self.field_feed.lock() = None;
        *self.watcher.lock() = None;
        for provider in self.query.take_provider_collections() {
            provider.close();
        }
        let ids: Vec<EntityId> = {
            let mut known = self.known.lock();
            known.items.clear();
            std::mem::take(&mut known.order)
        };
        if self.change_feed {
            for id in &ids {
                self.session.decrease_usage(&self.entity_type, id);
            }
        }
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // -- feed event handling -----------------------------------------------

    async fn handle_event(&self, event: &EntityEvent) {
        if self.closed() {
            return;
        }
        let predicate = self.compiled.lock().predicate.clone();
        let paginated = self.pagination.lock().active;

        let result = match event {
            EntityEvent::Add { id, version, item } => {
                self.on_add(&predicate, paginated, id, *version, item).await
            }
            EntityEvent::Update { id, version, item } => {
                self.on_upsert(&predicate, paginated, id, *version, item, false)
                    .await
            }
            EntityEvent::Patch {
                id, version, item, ..
            } => {
                self.on_upsert(&predicate, paginated, id, *version, item, true)
                    .await
            }
            EntityEvent::Remove { id, .. } => {
                // Under pagination even an unknown row shifts the window and
                // shrinks the total, so the re-query is unconditional.
                if paginated {
                    self.update_collection(true).await
                } else if !self.contains(id) {
                    Ok(())
                } else {
                    self.remove_member(id);
                    self.notify_watcher().await;
                    Ok(())
                }
            }
            EntityEvent::RemoveMany { ids } => {
                if paginated {
                    self.update_collection(true).await
                } else {
                    let known: Vec<EntityId> =
                        ids.iter().filter(|id| self.contains(id)).cloned().collect();
                    if known.is_empty() {
                        Ok(())
                    } else {
                        self.bulk_remove(known);
                        self.notify_watcher().await;
                        Ok(())
                    }
                }
            }
        };
        if let Err(error) = result {
            warn!(
                "Collection {}: feed-triggered update failed: {}",
                self.id, error
            );
        }
    }

    async fn on_add(
        &self,
        predicate: &Filter,
        paginated: bool,
        id: &EntityId,
        version: Version,
        item: &Row,
    ) -> Result<()> {
        if self.contains(id) || !predicate.matches(item) {
            return Ok(());
        }
        if paginated {
            // A single new row cannot be placed inside a page without
            // re-ranking the whole result set.
            return self.update_collection(true).await;
        }
        self.add_member(id, self.shape_row(item), version);
        self.notify_watcher().await;
        Ok(())
    }

    async fn on_upsert(
        &self,
        predicate: &Filter,
        paginated: bool,
        id: &EntityId,
        version: Version,
        item: &Row,
        is_patch: bool,
    ) -> Result<()> {
        let matches = predicate.matches(item);
        let known = self.contains(id);

        if known && !matches {
            if paginated {
                return self.update_collection(true).await;
            }
            self.remove_member(id);
            self.notify_watcher().await;
            return Ok(());
        }

        if !known && matches {
            if paginated {
                return self.update_collection(true).await;
            }
            // A partial diff cannot represent collection membership to the
            // client; fetch the current full row before pushing the add.
            let row = if is_patch {
                let key = item.get(&self.primary_key).cloned().unwrap_or(Value::Null);
                match self.refetch(&key).await? {
                    Some(versioned) => versioned.row,
                    None => {
                        warn!(
                            "Collection {}: row {}/{} vanished during refetch, skipping",
                            self.id, self.entity_type, id
                        );
                        return Ok(());
                    }
                }
            } else {
                self.shape_row(item)
            };
            self.add_member(id, row, version);
            self.notify_watcher().await;
            return Ok(());
        }

        if known && matches {
            // Member stays; refresh the stored representation. The entity
            // channel carries the change to the client.
            let shaped = self.shape_row(item);
            let projected_changed = {
                let mut state = self.known.lock();
                let changed = match (&self.projected_field, state.items.get(id)) {
                    (Some(field), Some(previous)) => previous.get(field) != shaped.get(field),
                    _ => false,
                };
                state.items.insert(id.clone(), shaped);
                changed
            };
            if projected_changed {
                self.notify_watcher().await;
            }
        }
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn register_feeds(&self, compiled: &CompiledQuery) {
        let bus = self.session.database().bus();
        let handler = Arc::new(CollectionFeed {
            collection: self.self_ref.clone(),
        });
        *self.feed.lock() = Some(bus.subscribe(self.entity_type.clone(), handler));
        self.register_field_hint(compiled);
    }

    fn register_field_hint(&self, compiled: &CompiledQuery) {
        let bus = self.session.database().bus();
        let hint = match self.hint_fields(compiled) {
            Some(fields) => bus.register_fields(self.entity_type.clone(), fields),
            None => bus.register_all_fields(self.entity_type.clone()),
        };
        *self.field_feed.lock() = Some(hint);
    }

    /// Columns whose patches matter to this collection. `None` means every
    /// column can matter (full-row collections), which registers an
    /// all-columns hint.
    fn hint_fields(&self, compiled: &CompiledQuery) -> Option<BTreeSet<String>> {
        let mut fields = compiled.fields.clone();
        fields.insert(self.primary_key.clone());
        match (&self.projected_field, &self.fields) {
            (Some(projected), _) => {
                fields.insert(projected.clone());
                Some(fields)
            }
            (None, Some(projection)) => {
                fields.extend(projection.iter().cloned());
                Some(fields)
            }
            (None, None) => None,
        }
    }

    fn fetch_projection(&self) -> Option<Vec<String>> {
        self.fields.clone()
    }

    fn read_options(&self, projection: Option<Vec<String>>) -> (ReadOptions, bool) {
        let pagination = self.pagination.lock();
        let mut options = ReadOptions::new().sort(pagination.sort.clone());
        if let Some(projection) = projection {
            options = options.project(projection);
        }
        if pagination.active {
            options = options.page(
                (pagination.page - 1) * pagination.items_per_page,
                pagination.items_per_page,
            );
        }
        (options, pagination.active)
    }

    async fn refetch(&self, key: &Value) -> Result<Option<VersionedRow>> {
        let filter = Filter::Eq(self.primary_key.clone(), key.clone());
        let mut options = ReadOptions::new().page(0, 1);
        if let Some(projection) = self.fetch_projection() {
            options = options.project(projection);
        }
        Ok(self
            .session
            .database()
            .find(&self.entity_type, &filter, &options)
            .await?
            .pop())
    }

    fn id_of(&self, row: &Row) -> EntityId {
        EntityId::from_value(row.get(&self.primary_key).unwrap_or(&Value::Null))
    }

    fn shape_row(&self, row: &Row) -> Row {
        match &self.fields {
            Some(fields) => {
                let mut projection = fields.clone();
                if !projection.contains(&self.primary_key) {
                    projection.push(self.primary_key.clone());
                }
                row.project(&projection)
            }
            None => row.clone(),
        }
    }

    fn add_member(&self, id: &EntityId, row: Row, version: Version) {
        {
            let mut known = self.known.lock();
            if known.items.contains_key(id) {
                return;
            }
            known.order.push(id.clone());
            known.items.insert(id.clone(), row.clone());
        }
        if self.change_feed {
            self.session.increase_usage(&self.entity_type, id);
            self.session.mark_sent(&self.entity_type, id, version);
            self.session.send(SyncMessage::CollectionAdd {
                collection: self.id,
                item: row,
            });
        }
        {
            let mut pagination = self.pagination.lock();
            pagination.total += 1;
        }
    }

    fn remove_member(&self, id: &EntityId) {
        let existed = {
            let mut known = self.known.lock();
            known.order.retain(|known_id| known_id != id);
            known.items.remove(id).is_some()
        };
        if !existed {
            return;
        }
        if self.change_feed {
            self.session.decrease_usage(&self.entity_type, id);
            self.session.send(SyncMessage::CollectionRemove {
                collection: self.id,
                id: id.clone(),
            });
        }
        let mut pagination = self.pagination.lock();
        pagination.total = pagination.total.saturating_sub(1);
    }

    fn bulk_remove(&self, ids: Vec<EntityId>) {
        {
            let mut known = self.known.lock();
            for id in &ids {
                known.items.remove(id);
            }
            known.order.retain(|id| !ids.contains(id));
        }
        if self.change_feed {
            for id in &ids {
                self.session.decrease_usage(&self.entity_type, id);
            }
            self.session.send(SyncMessage::CollectionRemoveMany {
                collection: self.id,
                ids: ids.clone(),
            });
        }
        let mut pagination = self.pagination.lock();
        pagination.total = pagination.total.saturating_sub(ids.len());
    }

    async fn notify_watcher(&self) {
        let owner = {
            let watcher = self.watcher.lock();
            match watcher.as_ref() {
                Some(callback) => callback(self.projected_values()),
                None => None,
            }
        };
        if let Some(owner) = owner {
            // Boxed: the owner's re-query may itself notify a watcher.
            let refresh = Box::pin(owner.update_collection(true));
            if let Err(error) = refresh.await {
                warn!(
                    "Collection {}: dependent collection refresh failed: {}",
                    self.id, error
                );
            }
        }
    }
}

/// Bus handler delivering feed events into one collection.
struct CollectionFeed {
    collection: Weak<LiveCollection>,
}

#[async_trait]
impl EntityEventHandler for CollectionFeed {
    async fn on_event(&self, event: &EntityEvent) {
        if let Some(collection) = self.collection.upgrade() {
            collection.handle_event(event).await;
        }
    }
}
