//! Field, reference and entity type declarations.
//!
//! A schema is a static mapping from field name to field descriptor and
//! from reference name to reference descriptor, built once when the entity
//! type is defined.

mod entity_type;
mod field;
mod reference;
mod registry;

pub use entity_type::{EntitySchema, EntitySchemaBuilder};
pub use field::{DefaultGenerator, FieldDefault, FieldDescriptor, FieldKind, ListItem, Negated};
pub use reference::{OwnerValue, ReferenceDescriptor, ReferenceKind, Target};
pub use registry::SchemaRegistry;
