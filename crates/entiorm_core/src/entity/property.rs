//! Handles to nested properties of an entity.
//!
//! A handle owns no data. It addresses a location inside the root entity's
//! view and carries the root's [`DirtySet`], so a change made through a
//! handle is visible on the root.

use super::dirty::{join_path, DirtySet, LIST_SEGMENT};
use super::{Container, Entity, EntityRef, Segment};
use crate::error::{CoreError, CoreResult};
use crate::schema::{EntitySchema, FieldDescriptor, FieldKind, ListItem};
use entiorm_codec::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

struct Location {
    entity: EntityRef,
    segments: Vec<Segment>,
    path: String,
    dirty: DirtySet,
}

impl Location {
    fn root(entity: &EntityRef, name: &str) -> Self {
        Self {
            entity: Arc::clone(entity),
            segments: vec![Segment::Key(name.to_string())],
            path: name.to_string(),
            dirty: entity.dirty.clone(),
        }
    }

    fn child(&self, segment: Segment, path: String) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self {
            entity: Arc::clone(&self.entity),
            segments,
            path,
            dirty: self.dirty.clone(),
        }
    }

    fn read<R>(&self, read: impl FnOnce(Option<&Value>) -> R) -> R {
        self.entity.read_at(&self.segments, read)
    }

    fn write<R>(&self, container: Container, write: impl FnOnce(&mut Value) -> R) -> CoreResult<R> {
        self.entity
            .write_at(&self.segments, container, write)
            .ok_or_else(|| CoreError::invalid_operation(format!("{} no longer exists", self.path)))
    }
}

fn open_object(location: Location, field: &FieldDescriptor) -> CoreResult<ObjectProperty> {
    match field.kind() {
        FieldKind::Object(schema) => Ok(ObjectProperty {
            schema: Arc::clone(schema),
            location,
        }),
        _ => Err(not_a(&location.path, "an object")),
    }
}

fn open_dict(location: Location, field: &FieldDescriptor) -> CoreResult<DictProperty> {
    match field.kind() {
        FieldKind::Dict { default } => Ok(DictProperty {
            default: default.clone(),
            location,
        }),
        _ => Err(not_a(&location.path, "a dict")),
    }
}

fn open_list(location: Location, field: &FieldDescriptor) -> CoreResult<ListProperty> {
    match field.kind() {
        FieldKind::List(item) => Ok(ListProperty {
            item: item.clone(),
            location,
        }),
        _ => Err(not_a(&location.path, "a list")),
    }
}

fn not_a(path: &str, what: &str) -> CoreError {
    CoreError::invalid_operation(format!("{path} is not {what}"))
}

impl Entity {
    /// Handle to an embedded object field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names and `InvalidOperation`
    /// if the field is not an object.
    pub fn object(self: &Arc<Self>, name: &str) -> CoreResult<ObjectProperty> {
        let field = self.schema.require_field(name)?;
        open_object(Location::root(self, name), field)
    }

    /// Handle to a dict field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names and `InvalidOperation`
    /// if the field is not a dict.
    pub fn dict(self: &Arc<Self>, name: &str) -> CoreResult<DictProperty> {
        let field = self.schema.require_field(name)?;
        open_dict(Location::root(self, name), field)
    }

    /// Handle to a list field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names and `InvalidOperation`
    /// if the field is not a list.
    pub fn list(self: &Arc<Self>, name: &str) -> CoreResult<ListProperty> {
        let field = self.schema.require_field(name)?;
        open_list(Location::root(self, name), field)
    }
}

/// An embedded object with declared fields.
pub struct ObjectProperty {
    schema: Arc<EntitySchema>,
    location: Location,
}

impl ObjectProperty {
    /// Dot path of this object from the root entity.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.location.path
    }

    /// The embedded schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// The root's dirty set.
    #[must_use]
    pub fn dirty(&self) -> &DirtySet {
        &self.location.dirty
    }

    /// Reads a field, falling back to its default.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        let field = self.schema.require_field(name)?;
        let stored = self.location.read(|value| {
            value
                .and_then(Value::as_map)
                .and_then(|map| map.get(name))
                .filter(|v| !v.is_null())
                .cloned()
        });
        match stored {
            Some(value) => field.from_db(value),
            None => Ok(field.default_value_or_null()),
        }
    }

    /// Writes a field and records `<path>.<name>` as changed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let field = self.schema.require_field(name)?;
        let stored = field.to_db(value.into());
        self.location.write(Container::Map, |target| {
            if let Value::Map(map) = target {
                map.insert(name.to_string(), stored);
            }
        })?;
        self.location.dirty.mark(join_path(&self.location.path, name));
        Ok(())
    }

    /// Writes several fields.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names; earlier writes stay.
    pub fn update<K, I>(&self, fields: I) -> CoreResult<()>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (name, value) in fields {
            self.set(name.as_ref(), value)?;
        }
        Ok(())
    }

    /// Replaces the whole object and records its own path as changed.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if `fields` names an undeclared field.
    pub fn set_to(&self, fields: BTreeMap<String, Value>) -> CoreResult<()> {
        let mut stored = BTreeMap::new();
        for (name, value) in fields {
            let field = self.schema.require_field(&name)?;
            stored.insert(name, field.to_db(value));
        }
        self.location.write(Container::Map, |target| *target = Value::Map(stored))?;
        self.location.dirty.mark(self.location.path.clone());
        Ok(())
    }

    /// Current stored content, or an empty map.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.location
            .read(|value| value.filter(|v| v.as_map().is_some()).cloned())
            .unwrap_or_else(Value::empty_map)
    }

    /// Descriptor of a field addressed from the root entity, for filters.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared names.
    pub fn field(&self, name: &str) -> CoreResult<FieldDescriptor> {
        let field = self.schema.require_field(name)?;
        let prefix = self.location.path.replace(&format!(".{LIST_SEGMENT}"), "");
        Ok(field.under(&prefix))
    }

    /// Handle to a nested object field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` or `InvalidOperation` as
    /// [`Entity::object`] does.
    pub fn object(&self, name: &str) -> CoreResult<ObjectProperty> {
        let field = self.schema.require_field(name)?;
        open_object(self.nested(name), field)
    }

    /// Handle to a nested dict field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` or `InvalidOperation` as [`Entity::dict`]
    /// does.
    pub fn dict(&self, name: &str) -> CoreResult<DictProperty> {
        let field = self.schema.require_field(name)?;
        open_dict(self.nested(name), field)
    }

    /// Handle to a nested list field.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` or `InvalidOperation` as [`Entity::list`]
    /// does.
    pub fn list(&self, name: &str) -> CoreResult<ListProperty> {
        let field = self.schema.require_field(name)?;
        open_list(self.nested(name), field)
    }

    fn nested(&self, name: &str) -> Location {
        self.location.child(
            Segment::Key(name.to_string()),
            join_path(&self.location.path, name),
        )
    }
}

/// A schemaless map; missing keys read as the dict's default.
pub struct DictProperty {
    default: Value,
    location: Location,
}

impl DictProperty {
    /// Dot path of this dict from the root entity.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.location.path
    }

    /// Reads a key, or the default when missing.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        self.location
            .read(|value| value.and_then(Value::as_map).and_then(|map| map.get(key)).cloned())
            .unwrap_or_else(|| self.default.clone())
    }

    /// Returns `true` if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.location.read(|value| {
            value
                .and_then(Value::as_map)
                .is_some_and(|map| map.contains_key(key))
        })
    }

    /// Present keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.location.read(|value| {
            value
                .and_then(Value::as_map)
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Number of present keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.location
            .read(|value| value.and_then(Value::as_map).map_or(0, BTreeMap::len))
    }

    /// Returns `true` if no key is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes a key and records `<path>.<key>` as changed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the dict's location vanished.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.location.write(Container::Map, |target| {
            if let Value::Map(map) = target {
                map.insert(key.to_string(), value);
            }
        })?;
        self.location.dirty.mark(join_path(&self.location.path, key));
        Ok(())
    }

    /// Removes a key, returning its value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the dict's location vanished.
    pub fn remove(&self, key: &str) -> CoreResult<Option<Value>> {
        let removed = self.location.write(Container::Map, |target| match target {
            Value::Map(map) => map.remove(key),
            _ => None,
        })?;
        if removed.is_some() {
            self.location.dirty.mark(join_path(&self.location.path, key));
        }
        Ok(removed)
    }

    /// Writes several keys.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the dict's location vanished.
    pub fn update<K, I>(&self, entries: I) -> CoreResult<()>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        for (key, value) in entries {
            self.set(key.as_ref(), value)?;
        }
        Ok(())
    }

    /// Replaces the whole dict and records its own path as changed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the dict's location vanished.
    pub fn set_to(&self, entries: BTreeMap<String, Value>) -> CoreResult<()> {
        self.location
            .write(Container::Map, |target| *target = Value::Map(entries))?;
        self.location.dirty.mark(self.location.path.clone());
        Ok(())
    }
}

/// A list of values or embedded objects. Every mutation records
/// `<path>.[*]` as changed.
pub struct ListProperty {
    item: ListItem,
    location: Location,
}

impl ListProperty {
    /// Dot path of this list from the root entity.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.location.path
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.location
            .read(|value| value.and_then(Value::as_array).map_or(0, Vec::len))
    }

    /// Returns `true` if the list has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the item at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<Value> {
        self.location
            .read(|value| value.and_then(Value::as_array).and_then(|items| items.get(index)).cloned())
    }

    /// Copy of all items.
    #[must_use]
    pub fn values(&self) -> Vec<Value> {
        self.location
            .read(|value| value.and_then(Value::as_array).cloned())
            .unwrap_or_default()
    }

    /// Appends a value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the list's location vanished.
    pub fn push(&self, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.mutate(|items| items.push(value))
    }

    /// Appends an embedded object built from `fields` and returns a handle
    /// to it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for lists of plain values and
    /// `UnknownField` for undeclared names.
    pub fn push_object<K, I>(&self, fields: I) -> CoreResult<ObjectProperty>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let ListItem::Object(schema) = &self.item else {
            return Err(not_a(&self.location.path, "a list of objects"));
        };
        let mut stored = BTreeMap::new();
        for (name, value) in fields {
            let field = schema.require_field(name.as_ref())?;
            stored.insert(name.as_ref().to_string(), field.to_db(value));
        }
        let index = self.len();
        self.mutate(|items| items.push(Value::Map(stored)))?;
        self.item(index)
    }

    /// Handle to the embedded object at `index`.
    ///
    /// Writes through the handle record `<path>.[*].<field>`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for lists of plain values or when the
    /// index is out of range.
    pub fn item(&self, index: usize) -> CoreResult<ObjectProperty> {
        let ListItem::Object(schema) = &self.item else {
            return Err(not_a(&self.location.path, "a list of objects"));
        };
        if index >= self.len() {
            return Err(CoreError::invalid_operation(format!(
                "{} has no item {index}",
                self.location.path
            )));
        }
        Ok(ObjectProperty {
            schema: Arc::clone(schema),
            location: self.location.child(
                Segment::Index(index),
                join_path(&self.location.path, LIST_SEGMENT),
            ),
        })
    }

    /// Removes the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the list's location vanished.
    pub fn remove(&self, index: usize) -> CoreResult<Option<Value>> {
        if index >= self.len() {
            return Ok(None);
        }
        self.mutate(|items| Some(items.remove(index)))
    }

    /// Removes the first item equal to `value`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the list's location vanished.
    pub fn remove_value(&self, value: &Value) -> CoreResult<bool> {
        let Some(index) = self.values().iter().position(|item| item == value) else {
            return Ok(false);
        };
        self.mutate(|items| items.remove(index))?;
        Ok(true)
    }

    /// Replaces every item.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the list's location vanished.
    pub fn set_to(&self, values: Vec<Value>) -> CoreResult<()> {
        self.mutate(|items| *items = values)
    }

    /// Removes every item.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the list's location vanished.
    pub fn clear(&self) -> CoreResult<()> {
        self.mutate(Vec::clear)
    }

    fn mutate<R>(&self, change: impl FnOnce(&mut Vec<Value>) -> R) -> CoreResult<R> {
        let result = self.location.write(Container::Array, |target| match target {
            Value::Array(items) => Some(change(items)),
            _ => None,
        })?;
        let result =
            result.ok_or_else(|| not_a(&self.location.path, "a list"))?;
        self.location
            .dirty
            .mark(join_path(&self.location.path, LIST_SEGMENT));
        Ok(result)
    }
}
