//! Cross-crate integration test helpers.
//!
//! Provides utilities for checking that what the core believes it wrote
//! is what the storage adapter holds.

use crate::fixtures::TestStore;
use entiorm_codec::{ObjectView, Value};
use entiorm_core::{Config, EntityRef, Store};
use entiorm_storage::{split_full_id, Database};
use std::collections::HashMap;

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The store under test.
    pub shop: TestStore,
    /// Expected stored field values, by full id.
    expected: HashMap<String, HashMap<String, Value>>,
}

impl IntegrationHarness {
    /// Creates a new integration harness over the shop schema.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a harness whose store uses `config`.
    pub fn with_config(config: Config) -> Self {
        Self {
            shop: TestStore::with_config(config),
            expected: HashMap::new(),
        }
    }

    /// The store under test.
    pub fn store(&self) -> &Store {
        &self.shop.store
    }

    /// Records that `field` of a committed entity must be stored as `value`.
    pub fn expect_stored(&mut self, entity: &EntityRef, field: &str, value: impl Into<Value>) {
        let id = entity.full_id().expect("entity has an id");
        self.expected
            .entry(id)
            .or_default()
            .insert(field.to_string(), value.into());
    }

    /// Fetches the stored record of a committed entity.
    pub fn stored(&self, entity: &EntityRef) -> Option<ObjectView> {
        let id = entity.full_id()?;
        let (collection, key) = split_full_id(&id)?;
        self.shop.db.fetch(collection, key).expect("fetch record")
    }

    /// Checks the stored record of `entity` against its in-memory state.
    ///
    /// Identity keys and every recorded expectation must match.
    pub fn verify(&self, entity: &EntityRef) {
        let stored = self.stored(entity).expect("entity is stored");
        assert_eq!(stored.id(), entity.full_id().as_deref(), "id mismatch");
        assert_eq!(
            stored.rev(),
            entity.revision().as_deref(),
            "revision mismatch for {:?}",
            entity.full_id()
        );
        assert!(!entity.is_dirty(), "{:?} still has changes", entity.full_id());
    }

    /// Verifies every recorded expectation against the database.
    pub fn verify_all(&self) {
        for (id, fields) in &self.expected {
            let (collection, key) = split_full_id(id).expect("full id");
            let stored = self
                .shop
                .db
                .fetch(collection, key)
                .expect("fetch record")
                .unwrap_or_else(|| panic!("{id} is not stored"));
            for (field, value) in fields {
                assert_eq!(
                    stored.get(field),
                    Some(value),
                    "field {field} of {id} mismatch"
                );
            }
        }
    }

    /// Returns the count of tracked entities.
    pub fn tracked_count(&self) -> usize {
        self.expected.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Reloads `entity` through a fresh unit of work on the same database.
///
/// The returned instance is never the one passed in.
pub fn reload(store: &Store, entity: &EntityRef) -> Option<EntityRef> {
    let id = entity.full_id()?;
    store
        .fork()
        .get(entity.schema(), &id)
        .expect("reload entity")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_tracks_expectations() {
        let mut harness = IntegrationHarness::new();
        let product = harness.store().create("Product").unwrap();
        product.set("name", "Tea").unwrap();
        product.set("price", 3).unwrap();
        harness.store().commit().unwrap();

        harness.expect_stored(&product, "name", "Tea");
        harness.expect_stored(&product, "price", 3.0);
        harness.verify(&product);
        harness.verify_all();
        assert_eq!(harness.tracked_count(), 1);
    }

    #[test]
    fn test_reload_is_a_new_instance() {
        let harness = IntegrationHarness::new();
        let product = harness.store().create("Product").unwrap();
        product.set("name", "Tea").unwrap();
        harness.store().commit().unwrap();

        let reloaded = reload(harness.store(), &product).unwrap();
        assert!(!std::sync::Arc::ptr_eq(&reloaded, &product));
        assert_eq!(reloaded.get("name").unwrap(), Value::from("Tea"));
    }
}
