//! Database driver registry.

use crate::config::ConnectionConfig;
use crate::error::{CoreError, CoreResult};
use entiorm_storage::{Database, InMemoryDatabase, StorageResult};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds a database adapter from connection settings.
pub type DriverFactory =
    Arc<dyn Fn(&ConnectionConfig) -> StorageResult<Arc<dyn Database>> + Send + Sync>;

/// Maps driver names to adapter factories.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in `memory` driver.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_config: &ConnectionConfig| {
            Ok(Arc::new(InMemoryDatabase::new()) as Arc<dyn Database>)
        });
        registry
    }

    /// Registers (or replaces) a driver.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ConnectionConfig) -> StorageResult<Arc<dyn Database>> + Send + Sync + 'static,
    {
        self.drivers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Returns `true` if a driver with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Names of all registered drivers.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Creates an adapter for `config.driver`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDriver` if no driver has that name, or the adapter
    /// error if the factory fails.
    pub fn connect(&self, config: &ConnectionConfig) -> CoreResult<Arc<dyn Database>> {
        let factory = self
            .drivers
            .get(&config.driver)
            .ok_or_else(|| CoreError::UnknownDriver {
                name: config.driver.clone(),
            })?;
        tracing::debug!(driver = %config.driver, db = %config.db_name, "connecting");
        Ok(factory(config)?)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_driver_is_built_in() {
        let registry = DriverRegistry::with_defaults();
        let db = registry.connect(&ConnectionConfig::new("memory")).unwrap();
        assert_eq!(db.driver(), "memory");
    }

    #[test]
    fn unknown_driver_fails() {
        let registry = DriverRegistry::with_defaults();
        let err = registry
            .connect(&ConnectionConfig::new("arangodb"))
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::UnknownDriver { name } if name == "arangodb"));
    }

    #[test]
    fn custom_driver_registration() {
        let shared: Arc<dyn Database> = Arc::new(InMemoryDatabase::new());
        let mut registry = DriverRegistry::new();
        let handle = Arc::clone(&shared);
        registry.register("shared", move |_config: &ConnectionConfig| Ok(Arc::clone(&handle)));
        let db = registry.connect(&ConnectionConfig::new("shared")).unwrap();
        assert!(Arc::ptr_eq(&db, &shared));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["shared"]);
    }
}
