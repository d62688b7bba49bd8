//! Entities: raw field storage, identity and dirty tracking.
//!
//! An [`Entity`] keeps its fields in an [`ObjectView`] in their stored form,
//! so unknown attributes from a raw load survive a round-trip and a clean,
//! persisted entity serializes by returning that view unchanged. Reads
//! convert through the field's `from_db`, writes through its `to_db`.
//!
//! Every entity owns one [`DirtySet`]. Nested property handles
//! ([`ObjectProperty`], [`DictProperty`], [`ListProperty`]) write into the
//! root's view and record their changes in the same set.

mod collection;
mod dirty;
mod property;
mod reference;

pub use collection::Collection;
pub use dirty::{DirtySet, LIST_SEGMENT};
pub use property::{DictProperty, ListProperty, ObjectProperty};
pub use reference::ReferenceList;

pub(crate) use collection::CollectionState;

use crate::error::{CoreError, CoreResult};
use crate::schema::{EntitySchema, FieldDescriptor, FieldKind, ListItem, Target};
use crate::store::{Store, StoreInner};
use dirty::{changed_children, join_path, touches};
use entiorm_codec::{ObjectView, Value, ID_KEY, KEY_KEY, RESERVED_KEYS, REV_KEY};
use entiorm_storage::{split_full_id, WriteAck};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Shared handle to a live entity.
pub type EntityRef = Arc<Entity>;

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Per-entity cache of resolved relations.
#[derive(Debug, Clone)]
pub(crate) enum RefSlot {
    /// A transient target, stashed until it has an id.
    Pending(EntityRef),
    /// A resolved single target.
    Resolved(Option<EntityRef>),
    /// A resolved list of targets.
    Many(Vec<EntityRef>),
}

#[derive(Default)]
pub(crate) struct EntityState {
    pub(crate) data: ObjectView,
    pub(crate) refs: HashMap<String, RefSlot>,
    /// Transient items appended to reference lists, by reference name.
    pub(crate) ref_lists: HashMap<String, Vec<EntityRef>>,
    pub(crate) collections: HashMap<String, Arc<Mutex<CollectionState>>>,
}

/// Location of a nested value inside an entity's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
}

/// Shape a write location is coerced to before writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Container {
    Map,
    Array,
}

/// A typed, addressable record.
pub struct Entity {
    uid: u64,
    schema: Arc<EntitySchema>,
    state: RwLock<EntityState>,
    dirty: DirtySet,
    store: RwLock<Weak<StoreInner>>,
}

impl Entity {
    fn blank(schema: Arc<EntitySchema>, data: ObjectView) -> Self {
        Self {
            uid: NEXT_UID.fetch_add(1, Ordering::Relaxed),
            schema,
            state: RwLock::new(EntityState {
                data,
                ..EntityState::default()
            }),
            dirty: DirtySet::new(),
            store: RwLock::new(Weak::new()),
        }
    }

    /// Creates a transient entity with no stored fields.
    #[must_use]
    pub fn new(schema: Arc<EntitySchema>) -> EntityRef {
        Arc::new(Self::blank(schema, ObjectView::new()))
    }

    /// Creates a transient entity and sets the given fields.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names.
    pub fn with_data<K, I>(schema: Arc<EntitySchema>, fields: I) -> CoreResult<EntityRef>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let entity = Self::new(schema);
        for (name, value) in fields {
            entity.set(name.as_ref(), value)?;
        }
        Ok(entity)
    }

    /// Builds a clean entity from a stored record.
    ///
    /// Every declared value is checked through its field's `from_db`; the
    /// record itself is kept as the entity's raw view.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if a stored value cannot be converted.
    pub fn from_db(schema: Arc<EntitySchema>, record: ObjectView) -> CoreResult<EntityRef> {
        check_stored(&schema, record.as_map())?;
        Ok(Arc::new(Self::blank(schema, record)))
    }

    /// Process-unique number, stable for the lifetime of the entity.
    #[must_use]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// The entity's type.
    #[must_use]
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.schema.name()
    }

    /// Collection the entity is stored in.
    #[must_use]
    pub fn collection(&self) -> &str {
        self.schema.collection()
    }

    /// Collection-local key, if assigned.
    #[must_use]
    pub fn id(&self) -> Option<String> {
        let state = self.state.read();
        state.data.key().map(str::to_string).or_else(|| {
            state
                .data
                .id()
                .and_then(split_full_id)
                .map(|(_, key)| key.to_string())
        })
    }

    /// Full id (`collection/key`), if a key is assigned.
    #[must_use]
    pub fn full_id(&self) -> Option<String> {
        let state = self.state.read();
        state.data.id().map(str::to_string).or_else(|| {
            state
                .data
                .key()
                .map(|key| format!("{}/{key}", self.collection()))
        })
    }

    /// Revision token of the last write.
    #[must_use]
    pub fn revision(&self) -> Option<String> {
        self.state.read().data.rev().map(str::to_string)
    }

    /// Returns `true` if the entity has neither an id nor a key.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        let state = self.state.read();
        state.data.id().is_none() && state.data.key().is_none()
    }

    /// Returns `true` if the entity has been written to a database.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.state.read().data.id().is_some()
    }

    /// Assigns a client-chosen key. A full id is reduced to its key.
    ///
    /// # Errors
    ///
    /// Returns `IdentityImmutable` if a different key is already assigned.
    pub fn set_id(&self, id: &str) -> CoreResult<()> {
        let key = id.rsplit_once('/').map_or(id, |(_, key)| key);
        if let Some(current) = self.id() {
            if current == key {
                return Ok(());
            }
            return Err(CoreError::IdentityImmutable {
                entity: self.type_name().to_string(),
                current,
            });
        }
        self.state.write().data.set(KEY_KEY, key);
        self.dirty.mark(KEY_KEY);
        Ok(())
    }

    /// Reads a field, falling back to its default when unset.
    ///
    /// Foreign keys of stashed transient targets read as the target's
    /// current id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names and `InvalidValue` if the
    /// stored value cannot be converted.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        let field = self.schema.require_field(name)?;
        match field.kind() {
            FieldKind::ReferenceId { use_full_id } => {
                if let Some(target) = self.pending_target(field) {
                    return Ok(target_key(&target, *use_full_id).map_or(Value::Null, Value::from));
                }
            }
            FieldKind::ReferenceIdList => return Ok(Value::Array(self.reference_ids(field))),
            _ => {}
        }
        let stored = self
            .state
            .read()
            .data
            .get(name)
            .filter(|v| !v.is_null())
            .cloned();
        match stored {
            Some(value) => field.from_db(value),
            None => Ok(field.default_value_or_null()),
        }
    }

    /// Writes a field and records it as changed.
    ///
    /// Writing a foreign key drops whatever its reference had resolved.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names, and
    /// `IdentityImmutable` when changing an assigned id.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let field = self.schema.require_field(name)?;
        let value = value.into();
        if name == ID_KEY || name == KEY_KEY {
            return match value.as_text() {
                Some(id) => self.set_id(id),
                None if value.is_null() && self.id().is_none() => Ok(()),
                None => Err(match self.id() {
                    Some(current) => CoreError::IdentityImmutable {
                        entity: self.type_name().to_string(),
                        current,
                    },
                    None => CoreError::invalid_value(name, "ids are text"),
                }),
            };
        }

        let stored = field.to_db(value);
        let mut state = self.state.write();
        if let Some(reference) = field.ref_name() {
            state.refs.remove(reference);
            state.ref_lists.remove(reference);
        }
        state.data.set(name, stored);
        drop(state);
        self.dirty.mark(name);
        Ok(())
    }

    /// The shared dirty set.
    #[must_use]
    pub fn dirty(&self) -> &DirtySet {
        &self.dirty
    }

    /// Returns `true` if anything changed since the last clean state.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Copy of the raw stored view.
    #[must_use]
    pub fn raw(&self) -> ObjectView {
        self.state.read().data.clone()
    }

    /// Serializes the entity to its stored form.
    ///
    /// A clean, persisted entity returns its raw view. Otherwise the
    /// declared fields are rebuilt with defaults applied; `changes_only`
    /// keeps only the changed branches plus the identity keys.
    ///
    /// # Errors
    ///
    /// Returns `NotNullable` if a non-nullable field resolves to null.
    pub fn dump(&self, changes_only: bool) -> CoreResult<ObjectView> {
        self.serialize(changes_only, false)
    }

    /// Checks that the entity would serialize.
    ///
    /// Unlike [`Entity::dump`], a foreign key whose transient target has no
    /// id yet counts as set.
    ///
    /// # Errors
    ///
    /// Returns `NotNullable` if a non-nullable field resolves to null.
    pub fn validate(&self, changes_only: bool) -> CoreResult<()> {
        self.serialize(changes_only, true).map(drop)
    }

    /// JSON export without hidden fields.
    ///
    /// # Errors
    ///
    /// Returns `NotNullable` if the entity does not serialize.
    pub fn to_json(&self) -> CoreResult<serde_json::Value> {
        let mut view = self.dump(false)?;
        for hidden in self.schema.hidden_fields() {
            view.remove(hidden);
        }
        Ok(view.to_json())
    }

    fn serialize(&self, changes_only: bool, validating: bool) -> CoreResult<ObjectView> {
        let dirty = self.dirty.snapshot();
        if !changes_only && !validating && dirty.is_empty() && self.is_persisted() {
            return Ok(self.raw());
        }
        let links = self.resolve_links();

        let state = self.state.read();
        let source = state.data.as_map();
        let mut out = if changes_only {
            RESERVED_KEYS
                .iter()
                .filter_map(|key| source.get(*key).map(|v| ((*key).to_string(), v.clone())))
                .collect()
        } else {
            source.clone()
        };
        let ctx = DumpContext {
            entity: self.type_name(),
            links: Some(&links),
            validating,
        };
        dump_fields(
            &self.schema,
            source,
            "",
            changes_only.then_some(&dirty),
            ctx,
            &mut out,
        )?;
        drop(state);

        out.retain(|key, value| !(value.is_null() && RESERVED_KEYS.contains(&key.as_str())));
        Ok(ObjectView::from_map(out))
    }

    /// Foreign key values of stashed targets, computed without holding the
    /// entity's own lock.
    fn resolve_links(&self) -> Links {
        let (pending, lists) = {
            let state = self.state.read();
            let pending: Vec<(String, EntityRef)> = state
                .refs
                .iter()
                .filter_map(|(name, slot)| match slot {
                    RefSlot::Pending(target) => Some((name.clone(), Arc::clone(target))),
                    _ => None,
                })
                .collect();
            let lists: Vec<String> = state
                .ref_lists
                .iter()
                .filter(|(_, items)| !items.is_empty())
                .map(|(name, _)| name.clone())
                .collect();
            (pending, lists)
        };

        let mut links = Links::default();
        for (name, target) in pending {
            let Some(field) = self
                .schema
                .reference(&name)
                .and_then(|r| r.local_field())
                .and_then(|f| self.schema.field(f))
            else {
                continue;
            };
            let use_full_id = matches!(field.kind(), FieldKind::ReferenceId { use_full_id: true });
            match target_key(&target, use_full_id) {
                Some(key) => {
                    links.values.insert(field.name().to_string(), Value::from(key));
                }
                None => {
                    links.unresolved.insert(field.name().to_string());
                }
            }
        }
        for name in lists {
            let Some(field) = self
                .schema
                .reference(&name)
                .and_then(|r| r.local_field())
                .and_then(|f| self.schema.field(f))
            else {
                continue;
            };
            links
                .values
                .insert(field.name().to_string(), Value::Array(self.reference_ids(field)));
        }
        links
    }

    fn pending_target(&self, field: &FieldDescriptor) -> Option<EntityRef> {
        let reference = field.ref_name()?;
        match self.state.read().refs.get(reference) {
            Some(RefSlot::Pending(target)) => Some(Arc::clone(target)),
            _ => None,
        }
    }

    fn list_uses_full_id(&self, field: &FieldDescriptor) -> bool {
        field
            .ref_name()
            .and_then(|name| self.schema.reference(name))
            .is_some_and(|r| r.target() == &Target::Any)
    }

    /// Stored ids of a reference list field plus the ids of appended
    /// transient items that have one by now.
    fn reference_ids(&self, field: &FieldDescriptor) -> Vec<Value> {
        let (mut ids, pending) = {
            let state = self.state.read();
            let ids = state
                .data
                .get(field.name())
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let pending = field
                .ref_name()
                .and_then(|name| state.ref_lists.get(name))
                .cloned()
                .unwrap_or_default();
            (ids, pending)
        };
        let use_full_id = self.list_uses_full_id(field);
        ids.extend(
            pending
                .iter()
                .filter_map(|item| target_key(item, use_full_id))
                .map(Value::from),
        );
        ids
    }

    /// Entities that must be written before this one.
    #[must_use]
    pub fn dependencies(&self) -> Vec<EntityRef> {
        let state = self.state.read();
        let mut seen = HashSet::new();
        state
            .refs
            .values()
            .filter_map(|slot| match slot {
                RefSlot::Pending(target) => Some(target),
                _ => None,
            })
            .chain(state.ref_lists.values().flatten())
            .filter(|target| seen.insert(target.uid()))
            .cloned()
            .collect()
    }

    /// Records the identity a database assigned on write.
    pub(crate) fn apply_ack(&self, ack: &WriteAck) {
        let mut state = self.state.write();
        state.data.set(ID_KEY, ack.id.as_str());
        state.data.set(KEY_KEY, ack.key.as_str());
        state.data.set(REV_KEY, ack.rev.as_str());
    }

    /// Merges an inserted document into the raw view, so generated
    /// defaults keep the value that was written.
    pub(crate) fn absorb(&self, written: &ObjectView) {
        let mut state = self.state.write();
        for (key, value) in written.iter() {
            let missing = state.data.get(key).map_or(true, Value::is_null);
            if missing {
                state.data.set(key.clone(), value.clone());
            }
        }
    }

    pub(crate) fn snapshot(&self) -> ObjectView {
        self.raw()
    }

    pub(crate) fn restore(&self, snapshot: ObjectView) {
        self.state.write().data = snapshot;
    }

    /// Folds stashed targets into foreign keys and clears the dirty set.
    pub(crate) fn settle(&self) {
        let (pending, lists) = {
            let state = self.state.read();
            let pending: Vec<(String, EntityRef)> = state
                .refs
                .iter()
                .filter_map(|(name, slot)| match slot {
                    RefSlot::Pending(target) => Some((name.clone(), Arc::clone(target))),
                    _ => None,
                })
                .collect();
            let lists: Vec<(String, Vec<EntityRef>)> = state
                .ref_lists
                .iter()
                .map(|(name, items)| (name.clone(), items.clone()))
                .collect();
            (pending, lists)
        };

        let mut settled = Vec::new();
        for (name, target) in pending {
            let Some(field) = self
                .schema
                .reference(&name)
                .and_then(|r| r.local_field())
                .and_then(|f| self.schema.field(f))
            else {
                continue;
            };
            let use_full_id = matches!(field.kind(), FieldKind::ReferenceId { use_full_id: true });
            if let Some(key) = target_key(&target, use_full_id) {
                settled.push((name, field.name().to_string(), key, target));
            }
        }
        let mut folded = Vec::new();
        for (name, items) in lists {
            let Some(field) = self
                .schema
                .reference(&name)
                .and_then(|r| r.local_field())
                .and_then(|f| self.schema.field(f))
            else {
                continue;
            };
            let use_full_id = self.list_uses_full_id(field);
            let (done, waiting): (Vec<_>, Vec<_>) = items
                .into_iter()
                .map(|item| (target_key(&item, use_full_id), item))
                .partition(|(key, _)| key.is_some());
            let keys: Vec<Value> = done.into_iter().filter_map(|(k, _)| k).map(Value::from).collect();
            let waiting: Vec<EntityRef> = waiting.into_iter().map(|(_, item)| item).collect();
            folded.push((name, field.name().to_string(), keys, waiting));
        }

        let mut state = self.state.write();
        for (name, field, key, target) in settled {
            state.data.set(field, key);
            state.refs.insert(name, RefSlot::Resolved(Some(target)));
        }
        for (name, field, keys, waiting) in folded {
            if let Some(Value::Array(ids)) = state.data.get_mut(&field) {
                ids.extend(keys);
            } else {
                state.data.set(field, Value::Array(keys));
            }
            if waiting.is_empty() {
                state.ref_lists.remove(&name);
            } else {
                state.ref_lists.insert(name, waiting);
            }
        }
        drop(state);
        self.dirty.clear();
    }

    /// Binds the entity to `store`.
    pub(crate) fn attach(&self, store: &Store) -> CoreResult<()> {
        let mut slot = self.store.write();
        if let Some(current) = slot.upgrade() {
            if Arc::ptr_eq(&current, store.inner()) {
                return Ok(());
            }
            return Err(CoreError::AlreadyAttached {
                entity: self.type_name().to_string(),
            });
        }
        *slot = Arc::downgrade(store.inner());
        Ok(())
    }

    /// The store this entity is registered with, if it is still alive.
    #[must_use]
    pub fn store(&self) -> Option<Store> {
        self.store.read().upgrade().map(Store::from_inner)
    }

    pub(crate) fn require_store(&self) -> CoreResult<Store> {
        self.store().ok_or_else(|| CoreError::NotAttached {
            entity: self.type_name().to_string(),
        })
    }

    /// Reads the value at `location`.
    pub(crate) fn read_at<R>(&self, location: &[Segment], read: impl FnOnce(Option<&Value>) -> R) -> R {
        let state = self.state.read();
        read(resolve(state.data.as_map(), location))
    }

    /// Writes the value at `location`, creating containers along the way.
    ///
    /// Returns `None` if the location names a list index that does not
    /// exist.
    pub(crate) fn write_at<R>(
        &self,
        location: &[Segment],
        container: Container,
        write: impl FnOnce(&mut Value) -> R,
    ) -> Option<R> {
        let mut state = self.state.write();
        let target = resolve_mut(state.data.as_map_mut(), location)?;
        let fits = match container {
            Container::Map => matches!(target, Value::Map(_)),
            Container::Array => matches!(target, Value::Array(_)),
        };
        if !fits {
            *target = match container {
                Container::Map => Value::empty_map(),
                Container::Array => Value::Array(Vec::new()),
            };
        }
        Some(write(target))
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("uid", &self.uid)
            .field("type", &self.type_name())
            .field("full_id", &self.full_id())
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

/// Pushes `item` unless the same instance is already present.
pub(crate) fn push_unique(items: &mut Vec<EntityRef>, item: EntityRef) -> bool {
    if items.iter().any(|existing| Arc::ptr_eq(existing, &item)) {
        return false;
    }
    items.push(item);
    true
}

fn target_key(target: &Entity, use_full_id: bool) -> Option<String> {
    if use_full_id {
        target.full_id()
    } else {
        target.id()
    }
}

#[derive(Debug, Default)]
struct Links {
    values: HashMap<String, Value>,
    unresolved: HashSet<String>,
}

#[derive(Clone, Copy)]
struct DumpContext<'a> {
    entity: &'a str,
    links: Option<&'a Links>,
    validating: bool,
}

impl DumpContext<'_> {
    fn nested(self) -> Self {
        Self { links: None, ..self }
    }
}

fn dump_fields(
    schema: &EntitySchema,
    source: &BTreeMap<String, Value>,
    prefix: &str,
    restrict: Option<&BTreeSet<String>>,
    ctx: DumpContext<'_>,
    out: &mut BTreeMap<String, Value>,
) -> CoreResult<()> {
    for field in schema.fields() {
        let name = field.name();
        if prefix.is_empty() && RESERVED_KEYS.contains(&name) {
            continue;
        }
        let path = join_path(prefix, name);
        if restrict.is_some_and(|dirty| !touches(dirty, &path)) {
            continue;
        }
        let linked = ctx.links.and_then(|links| links.values.get(name)).cloned();
        let current = linked
            .or_else(|| source.get(name).filter(|v| !v.is_null()).cloned())
            .unwrap_or_else(|| field.to_db(field.default_value_or_null()));
        let whole = restrict.map_or(true, |dirty| dirty.contains(&path));

        let value = match (field.kind(), current) {
            (FieldKind::Object(inner), Value::Map(map)) => {
                let mut nested = if whole { map.clone() } else { BTreeMap::new() };
                let restrict = if whole { None } else { restrict };
                dump_fields(inner, &map, &path, restrict, ctx.nested(), &mut nested)?;
                Value::Map(nested)
            }
            (FieldKind::List(ListItem::Object(inner)), Value::Array(items)) => {
                let item_path = join_path(&path, LIST_SEGMENT);
                let mut dumped = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Map(map) => {
                            let mut nested = map.clone();
                            dump_fields(inner, &map, &item_path, None, ctx.nested(), &mut nested)?;
                            dumped.push(Value::Map(nested));
                        }
                        other => dumped.push(other),
                    }
                }
                Value::Array(dumped)
            }
            (FieldKind::Dict { .. }, Value::Map(map)) if !whole => {
                let changed = restrict
                    .map(|dirty| changed_children(dirty, &path))
                    .unwrap_or_default();
                Value::Map(
                    changed
                        .into_iter()
                        .map(|key| {
                            let value = map.get(&key).cloned().unwrap_or(Value::Null);
                            (key, value)
                        })
                        .collect(),
                )
            }
            (_, value) => value,
        };

        if value.is_null() && !field.is_nullable() {
            let awaiting_target =
                ctx.validating && ctx.links.is_some_and(|links| links.unresolved.contains(name));
            if !awaiting_target {
                return Err(CoreError::NotNullable {
                    entity: ctx.entity.to_string(),
                    field: path,
                });
            }
        }
        out.insert(name.to_string(), value);
    }
    Ok(())
}

fn check_stored(schema: &EntitySchema, record: &BTreeMap<String, Value>) -> CoreResult<()> {
    for field in schema.fields() {
        let Some(value) = record.get(field.name()).filter(|v| !v.is_null()) else {
            continue;
        };
        match (field.kind(), value) {
            (FieldKind::Object(inner), Value::Map(map)) => check_stored(inner, map)?,
            (FieldKind::List(ListItem::Object(inner)), Value::Array(items)) => {
                for map in items.iter().filter_map(Value::as_map) {
                    check_stored(inner, map)?;
                }
            }
            _ => {
                field.from_db(value.clone())?;
            }
        }
    }
    Ok(())
}

fn resolve<'a>(root: &'a BTreeMap<String, Value>, location: &[Segment]) -> Option<&'a Value> {
    let (first, rest) = location.split_first()?;
    let Segment::Key(key) = first else {
        return None;
    };
    let mut current = root.get(key)?;
    for segment in rest {
        current = match segment {
            Segment::Key(key) => current.as_map()?.get(key)?,
            Segment::Index(i) => current.as_array()?.get(*i)?,
        };
    }
    Some(current)
}

fn resolve_mut<'a>(
    root: &'a mut BTreeMap<String, Value>,
    location: &[Segment],
) -> Option<&'a mut Value> {
    let (first, rest) = location.split_first()?;
    let Segment::Key(key) = first else {
        return None;
    };
    let mut current = root.entry(key.clone()).or_insert(Value::Null);
    for segment in rest {
        current = match segment {
            Segment::Key(key) => {
                if !matches!(current, Value::Map(_)) {
                    *current = Value::empty_map();
                }
                match current {
                    Value::Map(map) => map.entry(key.clone()).or_insert(Value::Null),
                    _ => return None,
                }
            }
            Segment::Index(i) => match current {
                Value::Array(items) => items.get_mut(*i)?,
                _ => return None,
            },
        };
    }
    Some(current)
}
