//! Open-ended record container.

use crate::error::CodecError;
use crate::value::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Reserved key holding the collection-qualified id (`collection/key`).
pub const ID_KEY: &str = "_id";

/// Reserved key holding the collection-local key.
pub const KEY_KEY: &str = "_key";

/// Reserved key holding the revision token assigned by the backing store.
pub const REV_KEY: &str = "_rev";

/// The three reserved identity keys, in dump order.
pub const RESERVED_KEYS: [&str; 3] = [ID_KEY, KEY_KEY, REV_KEY];

/// A string-keyed record of values.
///
/// `ObjectView` is the raw storage of an entity and the shape of every
/// persisted record. It does not know about schemas: attributes that no
/// schema declares are kept as-is, so a raw load survives a round-trip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectView {
    data: BTreeMap<String, Value>,
}

impl ObjectView {
    /// Creates an empty view.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a view over an existing map.
    #[must_use]
    pub fn from_map(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.data.get_mut(key)
    }

    /// Looks up a dot-separated path through nested maps.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let value = self.data.get(head)?;
        match rest {
            Some(rest) => value.get_path(rest),
            None => Some(value),
        }
    }

    /// Returns `true` if `key` is present (even when it holds null).
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.data.insert(key.into(), value.into())
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Shallow merge: every key of `other` overwrites the same key here.
    pub fn update(&mut self, other: ObjectView) {
        self.data.extend(other.data);
    }

    /// Replaces the whole content of the view.
    pub fn replace(&mut self, other: ObjectView) {
        self.data = other.data;
    }

    /// Returns the entry for `key`, for in-place construction.
    pub fn entry(&mut self, key: impl Into<String>) -> btree_map::Entry<'_, String, Value> {
        self.data.entry(key.into())
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterates over the stored keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Iterates over key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.data.iter()
    }

    /// Borrows the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Mutably borrows the underlying map.
    pub fn as_map_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.data
    }

    /// Text stored under `key`, if any.
    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_text)
    }

    /// The collection-qualified id (`_id`), if present.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.text(ID_KEY)
    }

    /// The collection-local key (`_key`), if present.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.text(KEY_KEY)
    }

    /// The revision token (`_rev`), if present.
    #[must_use]
    pub fn rev(&self) -> Option<&str> {
        self.text(REV_KEY)
    }

    /// Clones the view into a map value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Map(self.data.clone())
    }

    /// Converts the view into a map value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Map(self.data)
    }

    /// The JSON form of the record.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.data
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, Value>> for ObjectView {
    fn from(data: BTreeMap<String, Value>) -> Self {
        Self { data }
    }
}

impl TryFrom<Value> for ObjectView {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Map(data) => Ok(Self { data }),
            other => Err(CodecError::NotAMap {
                type_name: other.type_name(),
            }),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for ObjectView {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self {
            data: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl IntoIterator for ObjectView {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.data.into_iter()
    }
}
