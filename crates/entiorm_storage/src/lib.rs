//! # EntiORM Storage
//!
//! The database adapter boundary for EntiORM.
//!
//! This crate defines what the unit-of-work core expects from a backing
//! store. Adapters are **record stores**: they persist string-keyed records
//! grouped by collection and evaluate filters, but know nothing about
//! entities, references or commit ordering.
//!
//! ## Design Principles
//!
//! - One [`Database`] is shared by every store forked from the same root
//! - All writes of one commit go through one [`Transaction`]
//! - A transaction publishes all of its writes or none of them
//! - [`Filter`] values describe comparisons; adapters translate them
//!
//! ## Available Adapters
//!
//! - [`InMemoryDatabase`] - For testing and ephemeral stores
//!
//! ## Example
//!
//! ```rust
//! use entiorm_storage::{Database, Filter, InMemoryDatabase, QuerySpec};
//!
//! let db = InMemoryDatabase::new();
//! db.setup_schema(&["orders".to_string()]).unwrap();
//! let spec = QuerySpec::new("orders").filter(Filter::eq("state", "open"));
//! assert!(db.query(&spec).unwrap().is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod error;
mod filter;
mod memory;

pub use database::{
    split_full_id, Database, DocumentWrite, QueryAction, QuerySpec, QueuedOp, RawStatement,
    Transaction, WriteAck,
};
pub use error::{StorageError, StorageResult};
pub use filter::{matches_all, Filter, FilterOp, Operand};
pub use memory::InMemoryDatabase;
