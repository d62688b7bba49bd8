//! Reverse-relation collections.
//!
//! A collection lists the entities of another type whose foreign key
//! points back at the owner. It is materialised on first access from the
//! store's secondary index and one query, then kept current from the
//! store's event feed without querying again.

use super::{push_unique, Entity, EntityRef};
use crate::error::{CoreError, CoreResult};
use crate::schema::{EntitySchema, OwnerValue, ReferenceKind, Target};
use crate::store::{Store, WeakEvent};
use entiorm_codec::Value;
use parking_lot::Mutex;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct CollectionState {
    items: Vec<EntityRef>,
    loaded: bool,
    events: Option<Receiver<WeakEvent>>,
}

impl Entity {
    /// Handle to a reverse-relation collection.
    ///
    /// The first access on an entity materialises the collection; later
    /// handles share its state.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` without a store, `UnknownField` or
    /// `InvalidOperation` for undeclared or misdeclared collections, or the
    /// adapter error of the initial load.
    pub fn reverse(self: &Arc<Self>, name: &str) -> CoreResult<Collection> {
        let reference = self.schema.require_reference(name)?;
        let ReferenceKind::Collection { filter, own_prop } = reference.kind() else {
            return Err(CoreError::invalid_operation(format!(
                "{}.{name} is not a collection",
                self.type_name()
            )));
        };
        let store = self.require_store()?;
        let target = match reference.target() {
            Target::Type(type_name) => store.registry().get(type_name)?,
            Target::Any => {
                return Err(CoreError::invalid_operation(format!(
                    "collection {}.{name} needs a concrete target type",
                    self.type_name()
                )))
            }
        };
        if let Some(unknown) = filter.iter().find(|f| target.foreign_key_of(f).is_none()) {
            return Err(CoreError::InvalidFilterTarget {
                collection: name.to_string(),
                message: format!("{}.{unknown} is not a foreign key", target.name()),
            });
        }

        let (state, fresh) = {
            let mut entity_state = self.state.write();
            match entity_state.collections.get(name) {
                Some(state) => (Arc::clone(state), false),
                None => {
                    let state = Arc::new(Mutex::new(CollectionState::default()));
                    entity_state
                        .collections
                        .insert(name.to_string(), Arc::clone(&state));
                    (state, true)
                }
            }
        };
        let collection = Collection {
            owner: Arc::clone(self),
            name: name.to_string(),
            target,
            filter: filter.clone(),
            own_prop: own_prop.clone(),
            state,
        };
        if fresh {
            collection.materialize(&store)?;
        }
        Ok(collection)
    }
}

/// Handle to a reverse-relation collection of an entity.
pub struct Collection {
    owner: EntityRef,
    name: String,
    target: Arc<EntitySchema>,
    filter: Vec<String>,
    own_prop: OwnerValue,
    state: Arc<Mutex<CollectionState>>,
}

impl Collection {
    /// Collection name on the owner.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current members.
    #[must_use]
    pub fn items(&self) -> Vec<EntityRef> {
        self.drain();
        self.state.lock().items.clone()
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drain();
        self.state.lock().items.len()
    }

    /// Returns `true` if the collection has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `entity` is a member.
    #[must_use]
    pub fn contains(&self, entity: &EntityRef) -> bool {
        self.drain();
        self.state
            .lock()
            .items
            .iter()
            .any(|item| Arc::ptr_eq(item, entity))
    }

    /// Whether the database has been queried for members.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    /// Marks the collection as loaded, so no query is made for it.
    pub fn mark_loaded(&self) {
        self.state.lock().loaded = true;
    }

    /// Drops the members and materialises the collection again.
    ///
    /// # Errors
    ///
    /// Returns `NotAttached` if the owner lost its store, or the adapter
    /// error of the query.
    pub fn refresh(&self) -> CoreResult<()> {
        let store = self.owner.require_store()?;
        let events = store.watch();
        {
            let mut state = self.state.lock();
            state.items.clear();
            state.loaded = false;
            state.events = Some(events);
        }
        let prefill = self.prefill(&store)?;
        {
            let mut state = self.state.lock();
            for item in prefill {
                push_unique(&mut state.items, item);
            }
        }
        self.load(&store)
    }

    /// Adds `child` by pointing its foreign key at the owner and
    /// registering it with the owner's store.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFilterTarget` if the collection filters on several
    /// fields, if `child` has the wrong type, or if the owner has no value
    /// to point at.
    pub fn append(&self, child: &EntityRef) -> CoreResult<()> {
        let [field] = self.filter.as_slice() else {
            return Err(self.invalid_target("it filters on several fields"));
        };
        if child.collection() != self.target.collection() {
            return Err(self.invalid_target(&format!(
                "expected {}, got {}",
                self.target.name(),
                child.type_name()
            )));
        }

        let by_identity = matches!(self.own_prop, OwnerValue::Id | OwnerValue::FullId);
        let reference = matches!(
            self.target.reference(field).map(|r| r.kind()),
            Some(ReferenceKind::Reference { .. })
        );
        if by_identity && reference {
            child.set_reference(field, Some(&self.owner))?;
        } else {
            let owner_value = self.owner_value()?;
            if owner_value.is_null() {
                return Err(self.invalid_target("the owner has no value to point at"));
            }
            let fk = self
                .target
                .foreign_key_of(field)
                .ok_or_else(|| self.invalid_target("no foreign key"))?;
            child.set(fk, owner_value)?;
        }

        let child = match self.owner.store() {
            Some(store) => store.add(child)?,
            None => Arc::clone(child),
        };
        push_unique(&mut self.state.lock().items, child);
        Ok(())
    }

    fn invalid_target(&self, message: &str) -> CoreError {
        CoreError::InvalidFilterTarget {
            collection: self.name.clone(),
            message: message.to_string(),
        }
    }

    fn owner_value(&self) -> CoreResult<Value> {
        Ok(match &self.own_prop {
            OwnerValue::Id => self.owner.id().map_or(Value::Null, Value::from),
            OwnerValue::FullId => self.owner.full_id().map_or(Value::Null, Value::from),
            OwnerValue::Field(name) => self.owner.get(name)?,
        })
    }

    fn matches(&self, child: &Entity, owner_value: &Value) -> bool {
        if child.collection() != self.target.collection() {
            return false;
        }
        self.filter.iter().any(|field| {
            let linked = child
                .linked(field)
                .is_some_and(|target| Arc::ptr_eq(&target, &self.owner));
            linked
                || (!owner_value.is_null()
                    && self.target.foreign_key_of(field).is_some_and(|fk| {
                        child
                            .get(fk)
                            .is_ok_and(|value| value.loose_eq(owner_value))
                    }))
        })
    }

    fn materialize(&self, store: &Store) -> CoreResult<()> {
        let events = store.watch();
        let prefill = self.prefill(store)?;
        {
            let mut state = self.state.lock();
            state.events = Some(events);
            for item in prefill {
                push_unique(&mut state.items, item);
            }
        }
        self.load(store)
    }

    /// Members the store already knows: indexed entities and unsaved ones
    /// that point at the owner.
    fn prefill(&self, store: &Store) -> CoreResult<Vec<EntityRef>> {
        let owner_value = self.owner_value()?;
        let mut found = Vec::new();
        if !owner_value.is_null() {
            for field in &self.filter {
                if let Some(fk) = self.target.foreign_key_of(field) {
                    for entity in store.get_all_indexed(self.target.collection(), fk, &owner_value) {
                        push_unique(&mut found, entity);
                    }
                }
            }
        }
        for entity in store.get_all(self.target.collection()) {
            if !entity.is_persisted() {
                push_unique(&mut found, entity);
            }
        }
        found.retain(|entity| self.matches(entity, &owner_value));
        Ok(found)
    }

    fn load(&self, store: &Store) -> CoreResult<()> {
        if self.state.lock().loaded {
            return Ok(());
        }
        let owner_value = self.owner_value()?;
        if owner_value.is_null() || !store.has_database() {
            return Ok(());
        }

        let mut query = store.query_schema(&self.target);
        for (i, field) in self.filter.iter().enumerate() {
            let Some(fk) = self.target.foreign_key_of(field) else {
                continue;
            };
            let filter = self.target.require_field(fk)?.eq(owner_value.clone());
            query = query.filter(if i > 0 { filter.or_() } else { filter });
        }
        let found = query.all()?;
        tracing::debug!(
            collection = %self.name,
            owner = %self.owner.type_name(),
            found = found.len(),
            "collection loaded"
        );

        let mut state = self.state.lock();
        for entity in found {
            push_unique(&mut state.items, entity);
        }
        state.loaded = true;
        Ok(())
    }

    /// Applies store events received since the last access.
    fn drain(&self) {
        let events: Vec<WeakEvent> = {
            let state = self.state.lock();
            match &state.events {
                Some(events) => events.try_iter().collect(),
                None => return,
            }
        };
        if events.is_empty() {
            return;
        }
        let owner_value = self.owner_value().unwrap_or(Value::Null);
        let changes: Vec<(bool, EntityRef)> = events
            .into_iter()
            .filter_map(|event| match event {
                WeakEvent::Added(entity) => entity
                    .upgrade()
                    .filter(|entity| self.matches(entity, &owner_value))
                    .map(|entity| (true, entity)),
                WeakEvent::Removed(entity) => entity.upgrade().map(|entity| (false, entity)),
            })
            .collect();

        let mut state = self.state.lock();
        for (added, entity) in changes {
            if added {
                push_unique(&mut state.items, entity);
            } else {
                state.items.retain(|item| !Arc::ptr_eq(item, &entity));
            }
        }
    }
}
