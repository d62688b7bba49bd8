//! Mutable identity-map state of a store.

use crate::entity::{push_unique, EntityRef};
use entiorm_codec::Value;
use entiorm_storage::QueuedOp;
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::sync::Arc;

/// Callback run once after the next successful commit.
pub type AfterCommit = Box<dyn FnOnce() -> Result<(), Box<dyn Error + Send + Sync>> + Send>;

#[derive(Default)]
pub(crate) struct StoreState {
    /// Full id -> live entity.
    pub(crate) cache: HashMap<String, EntityRef>,
    /// Collection -> entities of that type, persisted or not.
    pub(crate) by_type: HashMap<String, Vec<EntityRef>>,
    /// Index key -> entities whose foreign key holds the indexed value.
    pub(crate) by_index: HashMap<String, Vec<EntityRef>>,
    /// Entities pending insert, by uid.
    pub(crate) new: BTreeMap<u64, EntityRef>,
    /// Entities pending delete, by uid.
    pub(crate) removed: BTreeMap<u64, EntityRef>,
    pub(crate) queued: Vec<QueuedOp>,
    pub(crate) after_commit: Vec<AfterCommit>,
}

/// Key of the secondary index: `collection_field_value`.
pub(crate) fn index_key(collection: &str, field: &str, value: &Value) -> String {
    format!("{collection}_{field}_{value}")
}

impl StoreState {
    /// Adds the entity under every non-null foreign key it holds.
    pub(crate) fn index(&mut self, entity: &EntityRef) {
        for field in entity.schema().reference_id_fields() {
            let Ok(value) = entity.get(field.name()) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let key = index_key(entity.collection(), field.name(), &value);
            push_unique(self.by_index.entry(key).or_default(), Arc::clone(entity));
        }
    }

    pub(crate) fn unindex(&mut self, entity: &EntityRef) {
        self.by_index.retain(|_, entities| {
            entities.retain(|e| !Arc::ptr_eq(e, entity));
            !entities.is_empty()
        });
    }

    pub(crate) fn reindex(&mut self, entity: &EntityRef) {
        self.unindex(entity);
        self.index(entity);
    }

    /// Drops the entity from every bucket.
    pub(crate) fn evict(&mut self, entity: &EntityRef) {
        self.cache.retain(|_, cached| !Arc::ptr_eq(cached, entity));
        if let Some(bucket) = self.by_type.get_mut(entity.collection()) {
            bucket.retain(|e| !Arc::ptr_eq(e, entity));
        }
        self.unindex(entity);
        self.new.remove(&entity.uid());
    }

    /// The entity pending delete under `full_id`, if any.
    pub(crate) fn pending_delete(&self, full_id: &str) -> Option<EntityRef> {
        self.removed
            .values()
            .find(|entity| entity.full_id().as_deref() == Some(full_id))
            .cloned()
    }

    /// Returns `true` if the entity is cached or pending insert.
    pub(crate) fn knows(&self, entity: &EntityRef) -> bool {
        self.new.contains_key(&entity.uid())
            || self
                .by_type
                .get(entity.collection())
                .is_some_and(|bucket| bucket.iter().any(|e| Arc::ptr_eq(e, entity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_key_format() {
        assert_eq!(
            index_key("orders", "customer_id", &Value::from("c1")),
            "orders_customer_id_c1"
        );
        assert_eq!(
            index_key("lines", "pos", &Value::Integer(3)),
            "lines_pos_3"
        );
    }
}
