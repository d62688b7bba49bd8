//! # EntiORM Testkit
//!
//! Test utilities for EntiORM.
//!
//! This crate provides:
//! - A sample shop schema and stores backed by the in-memory adapter
//! - Property-based test generators using proptest
//! - An integration harness comparing entities with stored records
//! - Stress helpers running forked stores against one shared database
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entiorm_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_test_store(|store| {
//!         let customer = store.create("Customer").unwrap();
//!         customer.set("name", "Ada").unwrap();
//!         store.commit().unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
