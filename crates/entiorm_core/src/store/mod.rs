//! The unit of work: identity map, pending sets and commit.
//!
//! A [`Store`] guarantees that one full id maps to one live entity. It
//! tracks entities pending insert and delete, indexes foreign keys for
//! reverse-relation lookups, and flushes everything to its database in one
//! transaction on [`Store::commit`].
//!
//! # Concurrency
//!
//! A store is meant for one logical writer at a time. Its internal locks
//! keep the maps consistent, but interleaving `add`, `remove` and `commit`
//! from several threads on the same store gives no useful ordering. Use
//! [`Store::fork`] to get an independent unit of work sharing the same
//! database.

mod commit;
mod events;
mod query;
mod state;

pub use commit::CommitSummary;
pub use events::StoreEvent;
pub(crate) use events::WeakEvent;
pub use query::Query;
pub use state::AfterCommit;

use crate::config::{Config, ConnectionConfig};
use crate::driver::DriverRegistry;
use crate::entity::{push_unique, Entity, EntityRef};
use crate::error::{CoreError, CoreResult};
use crate::schema::{EntitySchema, SchemaRegistry};
use entiorm_codec::{ObjectView, Value};
use entiorm_storage::{split_full_id, Database, QueuedOp, RawStatement};
use events::EventFeed;
use parking_lot::Mutex;
use state::{index_key, StoreState};
use std::error::Error;
use std::fmt;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

pub(crate) struct StoreInner {
    registry: Arc<SchemaRegistry>,
    database: Option<Arc<dyn Database>>,
    config: Config,
    state: Mutex<StoreState>,
    events: EventFeed,
}

/// Handle to a unit of work. Clones share the same state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    fn from_parts(
        registry: Arc<SchemaRegistry>,
        database: Option<Arc<dyn Database>>,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                registry,
                database,
                config,
                state: Mutex::new(StoreState::default()),
                events: EventFeed::default(),
            }),
        }
    }

    /// Creates a store without a database. Everything but loading and
    /// committing works.
    pub fn new(registry: impl Into<Arc<SchemaRegistry>>) -> Self {
        Self::from_parts(registry.into(), None, Config::default())
    }

    /// Creates a store bound to `database`.
    pub fn with_database(
        registry: impl Into<Arc<SchemaRegistry>>,
        database: Arc<dyn Database>,
        config: Config,
    ) -> Self {
        Self::from_parts(registry.into(), Some(database), config)
    }

    /// Creates a store with a database built by the driver `connection`
    /// names.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDriver` or the driver's adapter error.
    pub fn connect(
        drivers: &DriverRegistry,
        registry: impl Into<Arc<SchemaRegistry>>,
        connection: &ConnectionConfig,
        config: Config,
    ) -> CoreResult<Self> {
        let database = drivers.connect(connection)?;
        Ok(Self::with_database(registry, database, config))
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<StoreInner> {
        &self.inner
    }

    /// Registered entity types.
    #[must_use]
    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    /// Behavioural switches.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The bound database.
    ///
    /// # Errors
    ///
    /// Returns `NoDatabase` if the store has none.
    pub fn database(&self) -> CoreResult<&Arc<dyn Database>> {
        self.inner.database.as_ref().ok_or(CoreError::NoDatabase)
    }

    /// Returns `true` if the store is bound to a database.
    #[must_use]
    pub fn has_database(&self) -> bool {
        self.inner.database.is_some()
    }

    /// Looks up a registered type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` for unregistered names.
    pub fn schema(&self, type_name: &str) -> CoreResult<Arc<EntitySchema>> {
        self.inner.registry.get(type_name)
    }

    /// Creates a transient entity of a registered type and adds it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` for unregistered names.
    pub fn create(&self, type_name: &str) -> CoreResult<EntityRef> {
        let entity = Entity::new(self.schema(type_name)?);
        self.add(&entity)
    }

    /// Returns the live entity for `id`, loading it if it is not cached.
    ///
    /// `id` may be a key of `schema`'s collection or a full id. A full id
    /// of another collection is loaded as the type registered for that
    /// collection. Ids pending delete resolve to `None`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` for a full id of an unregistered
    /// collection, or the adapter error of the fetch. A missing record is
    /// `Ok(None)`, as is any cache miss on a store without database.
    pub fn get(&self, schema: &Arc<EntitySchema>, id: &str) -> CoreResult<Option<EntityRef>> {
        let (full_id, schema) = match split_full_id(id) {
            Some((collection, _)) if collection != schema.collection() => {
                (id.to_string(), self.inner.registry.resolve_id(id)?)
            }
            Some(_) => (id.to_string(), Arc::clone(schema)),
            None => (format!("{}/{id}", schema.collection()), Arc::clone(schema)),
        };
        if let Some(cached) = self.cached(&full_id) {
            tracing::trace!(id = %full_id, "identity map hit");
            return Ok(Some(cached));
        }
        let Some(database) = &self.inner.database else {
            return Ok(None);
        };
        let Some((collection, key)) = split_full_id(&full_id) else {
            return Ok(None);
        };
        tracing::debug!(id = %full_id, "identity map miss, fetching");
        match database.fetch(collection, key)? {
            Some(record) => self.load(&schema, record),
            None => Ok(None),
        }
    }

    /// [`Store::get`] by type name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` for unregistered names, or the adapter
    /// error of the fetch.
    pub fn get_by_name(&self, type_name: &str, id: &str) -> CoreResult<Option<EntityRef>> {
        let schema = self.schema(type_name)?;
        self.get(&schema, id)
    }

    /// Registers a loaded record, returning the cached instance if the id
    /// is already live. Records pending delete are skipped.
    pub(crate) fn load(
        &self,
        schema: &Arc<EntitySchema>,
        record: ObjectView,
    ) -> CoreResult<Option<EntityRef>> {
        let entity = Entity::from_db(Arc::clone(schema), record)?;
        if let Some(id) = entity.full_id() {
            if self.inner.state.lock().pending_delete(&id).is_some() {
                tracing::trace!(id = %id, "skipping record pending delete");
                return Ok(None);
            }
        }
        self.add(&entity).map(Some)
    }

    /// Registers an entity and returns the canonical instance for its id.
    ///
    /// If another instance with the same full id is cached, that instance is
    /// returned. Transient entities are queued for insert. Adding back an
    /// entity that is pending delete cancels the delete.
    ///
    /// # Errors
    ///
    /// Returns `IdentityConflict` if the cached instance carries a different
    /// revision (unless revision checks are off), `AlreadyAttached` if the
    /// entity belongs to another store, and `InvalidOperation` for another
    /// instance of an id pending delete.
    pub fn add(&self, entity: &EntityRef) -> CoreResult<EntityRef> {
        let full_id = entity.full_id();
        let persisted = entity.is_persisted();
        {
            let mut state = self.inner.state.lock();
            if let Some(id) = &full_id {
                if let Some(removed) = state.pending_delete(id) {
                    if !Arc::ptr_eq(&removed, entity) {
                        return Err(CoreError::invalid_operation(format!(
                            "{id} is pending delete"
                        )));
                    }
                    state.removed.remove(&entity.uid());
                }
                if let Some(cached) = state.cache.get(id).map(Arc::clone) {
                    drop(state);
                    if !Arc::ptr_eq(&cached, entity) {
                        self.check_revision(id, &cached, entity)?;
                    }
                    return Ok(cached);
                }
            }

            entity.attach(self)?;
            if let Some(id) = full_id {
                state.cache.insert(id, Arc::clone(entity));
            }
            if state.knows(entity) {
                return Ok(Arc::clone(entity));
            }
            if !persisted {
                state.new.insert(entity.uid(), Arc::clone(entity));
            }
            push_unique(
                state
                    .by_type
                    .entry(entity.collection().to_string())
                    .or_default(),
                Arc::clone(entity),
            );
            state.index(entity);
        }
        self.inner
            .events
            .emit(&StoreEvent::Added(Arc::clone(entity)));
        Ok(Arc::clone(entity))
    }

    fn check_revision(&self, id: &str, cached: &EntityRef, incoming: &EntityRef) -> CoreResult<()> {
        if !self.inner.config.check_revisions {
            return Ok(());
        }
        match (cached.revision(), incoming.revision()) {
            (Some(cached), Some(incoming)) if cached != incoming => {
                Err(CoreError::IdentityConflict {
                    id: id.to_string(),
                    cached,
                    incoming,
                })
            }
            _ => Ok(()),
        }
    }

    /// Removes an entity from the unit of work.
    ///
    /// Persisted entities are deleted on the next commit; transient ones
    /// are just dropped. Either way the entity leaves every cache.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyAttached` if the entity belongs to another store.
    pub fn remove(&self, entity: &EntityRef) -> CoreResult<()> {
        if let Some(owner) = entity.store() {
            if !Arc::ptr_eq(owner.inner(), &self.inner) {
                return Err(CoreError::AlreadyAttached {
                    entity: entity.type_name().to_string(),
                });
            }
        }
        let persisted = entity.is_persisted();
        {
            let mut state = self.inner.state.lock();
            state.evict(entity);
            if persisted {
                state.removed.insert(entity.uid(), Arc::clone(entity));
            }
        }
        tracing::debug!(entity = ?entity, persisted, "entity removed");
        self.inner
            .events
            .emit(&StoreEvent::Removed(Arc::clone(entity)));
        Ok(())
    }

    /// Every known entity of a collection, persisted or pending insert.
    #[must_use]
    pub fn get_all(&self, collection: &str) -> Vec<EntityRef> {
        self.inner
            .state
            .lock()
            .by_type
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Known entities of a collection whose foreign key `field` holds
    /// `value`.
    #[must_use]
    pub fn get_all_indexed(&self, collection: &str, field: &str, value: &Value) -> Vec<EntityRef> {
        self.inner
            .state
            .lock()
            .by_index
            .get(&index_key(collection, field, value))
            .cloned()
            .unwrap_or_default()
    }

    /// Starts a query over a registered type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` for unregistered names.
    pub fn query(&self, type_name: &str) -> CoreResult<Query> {
        Ok(self.query_schema(&self.schema(type_name)?))
    }

    /// Starts a query over `schema`.
    #[must_use]
    pub fn query_schema(&self, schema: &Arc<EntitySchema>) -> Query {
        Query::new(self.clone(), Arc::clone(schema))
    }

    /// Runs an adapter-native statement.
    ///
    /// # Errors
    ///
    /// Returns `NoDatabase` or the adapter error.
    pub fn raw(&self, statement: &RawStatement) -> CoreResult<Vec<Value>> {
        Ok(self.database()?.raw(statement)?)
    }

    /// Provisions the collections of every registered type.
    ///
    /// # Errors
    ///
    /// Returns `NoDatabase` or the adapter error.
    pub fn setup_db(&self) -> CoreResult<()> {
        let collections = self.inner.registry.collections();
        self.database()?.setup_schema(&collections)?;
        tracing::info!(collections = collections.len(), "database schema set up");
        Ok(())
    }

    pub(crate) fn queue(&self, op: QueuedOp) {
        tracing::debug!(collection = %op.query.collection, action = ?op.action, "operation queued");
        self.inner.state.lock().queued.push(op);
    }

    /// Registers a callback for after the next successful commit.
    ///
    /// A failing callback is logged and does not affect the commit.
    pub fn run_after_commit<F>(&self, callback: F)
    where
        F: FnOnce() -> Result<(), Box<dyn Error + Send + Sync>> + Send + 'static,
    {
        self.inner.state.lock().after_commit.push(Box::new(callback));
    }

    /// Subscribes to `Added` and `Removed` events.
    ///
    /// Events queue up until they are received; drop the receiver to
    /// unsubscribe.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn watch(&self) -> Receiver<WeakEvent> {
        self.inner.events.watch()
    }

    /// An empty store sharing this store's types, database and config.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self::from_parts(
            Arc::clone(&self.inner.registry),
            self.inner.database.clone(),
            self.inner.config.clone(),
        )
    }

    /// Forgets every cached and pending entity, queued operation and
    /// callback, and disconnects every event subscriber.
    ///
    /// Collections materialised before the call stop following the store;
    /// call [`Collection::refresh`](crate::Collection::refresh) to reload
    /// them.
    pub fn clear(&self) {
        *self.inner.state.lock() = StoreState::default();
        self.inner.events.reset();
        tracing::debug!("store cleared");
    }

    /// Entities pending insert, in registration order.
    #[must_use]
    pub fn pending_new(&self) -> Vec<EntityRef> {
        self.inner.state.lock().new.values().cloned().collect()
    }

    /// Entities pending delete.
    #[must_use]
    pub fn pending_removed(&self) -> Vec<EntityRef> {
        self.inner.state.lock().removed.values().cloned().collect()
    }

    /// Cached entities with changes that are not pending insert.
    #[must_use]
    pub fn changed(&self) -> Vec<EntityRef> {
        let state = self.inner.state.lock();
        let mut changed: Vec<EntityRef> = state
            .cache
            .values()
            .filter(|entity| entity.is_dirty() && !state.new.contains_key(&entity.uid()))
            .cloned()
            .collect();
        changed.sort_by_key(|entity| entity.uid());
        changed.dedup_by_key(|entity| entity.uid());
        changed
    }

    /// Returns `true` if this instance is cached or pending insert.
    #[must_use]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        let state = self.inner.state.lock();
        state.knows(entity)
            || state
                .cache
                .values()
                .any(|cached| Arc::ptr_eq(cached, entity))
    }

    /// The cached entity for a full id.
    #[must_use]
    pub fn cached(&self, full_id: &str) -> Option<EntityRef> {
        self.inner.state.lock().cache.get(full_id).cloned()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Store")
            .field(
                "driver",
                &self.inner.database.as_ref().map(|db| db.driver().to_string()),
            )
            .field("cached", &state.cache.len())
            .field("new", &state.new.len())
            .field("removed", &state.removed.len())
            .field("queued", &state.queued.len())
            .finish()
    }
}
