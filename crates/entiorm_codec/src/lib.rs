//! # EntiORM Codec
//!
//! Dynamic document values and their encodings for EntiORM.
//!
//! Every entity is backed by an [`ObjectView`], an open string-keyed record
//! of [`Value`]s. Records carry three reserved identity keys:
//!
//! - `_id`: the collection-qualified id, `collection/key`
//! - `_key`: the collection-local key
//! - `_rev`: the revision token assigned by the backing store
//!
//! Values convert to and from JSON for export, and to and from CBOR for
//! storage. CBOR output is deterministic because maps keep sorted keys.
//!
//! ## Usage
//!
//! ```
//! use entiorm_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::map([("name", Value::from("Alice"))]);
//! let bytes = to_cbor(&value).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod value;
mod view;

pub use cbor::{from_cbor, record_from_cbor, record_to_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use value::Value;
pub use view::{ObjectView, ID_KEY, KEY_KEY, RESERVED_KEYS, REV_KEY};
