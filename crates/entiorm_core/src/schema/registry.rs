//! Registry of entity types.

use crate::error::{CoreError, CoreResult};
use crate::schema::reference::Target;
use crate::schema::EntitySchema;
use entiorm_storage::split_full_id;
use std::collections::BTreeMap;
use std::sync::Arc;

/// All entity types known to a store, by name and by collection.
///
/// Polymorphic references resolve their target type through the
/// collection prefix of the stored full id.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    by_name: BTreeMap<String, Arc<EntitySchema>>,
    by_collection: BTreeMap<String, Arc<EntitySchema>>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for embedded schemas and for names or
    /// collections that are already taken.
    pub fn register(&mut self, schema: Arc<EntitySchema>) -> CoreResult<&mut Self> {
        if schema.is_embedded() {
            return Err(CoreError::invalid_operation(format!(
                "embedded type {} cannot be registered",
                schema.name()
            )));
        }
        if self.by_name.contains_key(schema.name())
            || self.by_collection.contains_key(schema.collection())
        {
            return Err(CoreError::invalid_operation(format!(
                "type {} (collection {}) is already registered",
                schema.name(),
                schema.collection()
            )));
        }
        self.by_collection
            .insert(schema.collection().to_string(), Arc::clone(&schema));
        self.by_name.insert(schema.name().to_string(), schema);
        Ok(self)
    }

    /// Registers several entity types.
    ///
    /// # Errors
    ///
    /// See [`SchemaRegistry::register`].
    pub fn with_schemas<I>(schemas: I) -> CoreResult<Self>
    where
        I: IntoIterator<Item = Arc<EntitySchema>>,
    {
        let mut registry = Self::new();
        for schema in schemas {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    /// Looks up a type by name.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if no type has this name.
    pub fn get(&self, name: &str) -> CoreResult<Arc<EntitySchema>> {
        self.by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::unknown_entity_type(name))
    }

    /// Looks up a type by collection.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if no type uses this collection.
    pub fn by_collection(&self, collection: &str) -> CoreResult<Arc<EntitySchema>> {
        self.by_collection
            .get(collection)
            .cloned()
            .ok_or_else(|| CoreError::unknown_entity_type(collection))
    }

    /// Resolves the type of a full id from its collection prefix.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the id has no prefix or the prefix is
    /// not a registered collection.
    pub fn resolve_id(&self, full_id: &str) -> CoreResult<Arc<EntitySchema>> {
        let (collection, _) =
            split_full_id(full_id).ok_or_else(|| CoreError::unknown_entity_type(full_id))?;
        self.by_collection(collection)
    }

    /// Resolves the type a reference points at, given the stored key.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntityType` if the target cannot be resolved.
    pub fn resolve_target(&self, target: &Target, stored: &str) -> CoreResult<Arc<EntitySchema>> {
        match target {
            Target::Type(name) => self.get(name),
            Target::Any => self.resolve_id(stored),
        }
    }

    /// Registered types in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntitySchema>> {
        self.by_name.values()
    }

    /// Collections of all registered types.
    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.by_collection.keys().cloned().collect()
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns `true` if no type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
