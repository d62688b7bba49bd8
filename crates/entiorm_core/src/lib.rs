//! # EntiORM Core
//!
//! Unit-of-work core for EntiORM.
//!
//! This crate provides:
//! - Schemas: typed field and reference descriptors per entity type
//! - Entities backed by an open record, with path-level change tracking
//! - References, reference lists and reverse collections between entities
//! - A [`Store`] acting as identity map and unit of work
//! - Dependency-ordered commit batches through [`BatchPlanner`]
//!
//! ## Example
//!
//! ```rust
//! use entiorm_core::{
//!     Config, EntitySchema, FieldDescriptor, ReferenceDescriptor, SchemaRegistry, Store,
//! };
//! use entiorm_codec::Value;
//! use entiorm_storage::InMemoryDatabase;
//! use std::sync::Arc;
//!
//! let customer = EntitySchema::builder("Customer")
//!     .field(FieldDescriptor::string("name").not_null())
//!     .build()
//!     .unwrap();
//! let order = EntitySchema::builder("Order")
//!     .field(FieldDescriptor::reference_id("customer_id"))
//!     .reference(ReferenceDescriptor::reference("customer", "customer_id", "Customer"))
//!     .build()
//!     .unwrap();
//! let registry = SchemaRegistry::with_schemas([customer, order]).unwrap();
//! let store = Store::with_database(registry, Arc::new(InMemoryDatabase::new()), Config::default());
//!
//! let ada = store.create("Customer").unwrap();
//! ada.set("name", "Ada").unwrap();
//! let first = store.create("Order").unwrap();
//! first.set_reference("customer", Some(&ada)).unwrap();
//!
//! let summary = store.commit().unwrap();
//! assert_eq!(summary.insert_batches, 2);
//! assert_eq!(first.get("customer_id").unwrap(), Value::from(ada.id().unwrap()));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod driver;
mod entity;
mod error;
mod planner;
mod schema;
mod store;

#[cfg(test)]
mod test_support;

pub use config::{Config, ConnectionConfig};
pub use driver::{DriverFactory, DriverRegistry};
pub use entity::{
    Collection, DictProperty, DirtySet, Entity, EntityRef, ListProperty, ObjectProperty,
    ReferenceList, LIST_SEGMENT,
};
pub use error::{CoreError, CoreResult};
pub use planner::BatchPlanner;
pub use schema::{
    DefaultGenerator, EntitySchema, EntitySchemaBuilder, FieldDefault, FieldDescriptor,
    FieldKind, ListItem, Negated, OwnerValue, ReferenceDescriptor, ReferenceKind,
    SchemaRegistry, Target,
};
pub use store::{AfterCommit, CommitSummary, Query, Store, StoreEvent};
