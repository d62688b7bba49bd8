//! Entity schemas.

use crate::error::{CoreError, CoreResult};
use crate::schema::field::{FieldDescriptor, FieldKind, ListItem};
use crate::schema::reference::{ReferenceDescriptor, ReferenceKind};
use convert_case::{Case, Casing};
use entiorm_codec::{ID_KEY, KEY_KEY, REV_KEY};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The declared shape of an entity type or embedded object.
///
/// Top-level schemas carry the implicit identity fields `_id`, `_key` and
/// `_rev` in front of their declared fields. Embedded schemas describe the
/// content of object fields and have no identity of their own.
#[derive(Debug)]
pub struct EntitySchema {
    name: String,
    collection: String,
    fields: Vec<FieldDescriptor>,
    field_index: BTreeMap<String, usize>,
    references: Vec<ReferenceDescriptor>,
    reference_index: BTreeMap<String, usize>,
    embedded: bool,
}

impl EntitySchema {
    /// Starts a schema for the type `name`.
    pub fn builder(name: impl Into<String>) -> EntitySchemaBuilder {
        EntitySchemaBuilder {
            name: name.into(),
            collection: None,
            fields: Vec::new(),
            references: Vec::new(),
            embedded: false,
        }
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection the type's entities are stored in.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether this schema describes an embedded object.
    #[must_use]
    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    /// Declared fields in declaration order, identity fields first.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    /// Looks up a field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    /// Looks up a field, failing with `UnknownField`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if no field has this name.
    pub fn require_field(&self, name: &str) -> CoreResult<&FieldDescriptor> {
        self.field(name)
            .ok_or_else(|| CoreError::unknown_field(self.name.as_str(), name))
    }

    /// Declared references.
    pub fn references(&self) -> impl Iterator<Item = &ReferenceDescriptor> {
        self.references.iter()
    }

    /// Looks up a reference.
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<&ReferenceDescriptor> {
        self.reference_index.get(name).map(|&i| &self.references[i])
    }

    /// Looks up a reference, failing with `UnknownField`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if no reference has this name.
    pub fn require_reference(&self, name: &str) -> CoreResult<&ReferenceDescriptor> {
        self.reference(name)
            .ok_or_else(|| CoreError::unknown_field(self.name.as_str(), name))
    }

    /// Foreign key fields (the ones indexed by the store).
    pub fn reference_id_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_reference_id())
    }

    /// Resolves a field or reference name to the foreign key field it is
    /// stored in.
    #[must_use]
    pub fn foreign_key_of(&self, name: &str) -> Option<&str> {
        match self.reference(name).map(ReferenceDescriptor::kind) {
            Some(ReferenceKind::Reference { field }) => Some(field),
            _ => self
                .field(name)
                .filter(|f| f.is_reference_id())
                .map(FieldDescriptor::name),
        }
    }

    /// Resolves a dot path through embedded objects to the leaf field.
    ///
    /// The returned descriptor builds filters over the full path.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if a segment is not declared, or if a
    /// non-final segment is not an object field.
    pub fn path(&self, path: &str) -> CoreResult<FieldDescriptor> {
        let mut schema = self;
        let mut prefix = String::new();
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let field = schema.require_field(segment)?;
            if segments.peek().is_none() {
                return Ok(field.under(&prefix));
            }
            schema = match field.kind() {
                FieldKind::Object(inner) | FieldKind::List(ListItem::Object(inner)) => inner,
                _ => return Err(CoreError::unknown_field(self.name.as_str(), path)),
            };
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);
        }
        Err(CoreError::unknown_field(self.name.as_str(), path))
    }

    /// Names of hidden fields.
    pub fn hidden_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.is_hidden())
            .map(FieldDescriptor::name)
    }
}

/// Builder for [`EntitySchema`].
#[derive(Debug)]
pub struct EntitySchemaBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<FieldDescriptor>,
    references: Vec<ReferenceDescriptor>,
    embedded: bool,
}

impl EntitySchemaBuilder {
    /// Overrides the derived collection name.
    #[must_use]
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Declares a field.
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares a reference.
    #[must_use]
    pub fn reference(mut self, reference: ReferenceDescriptor) -> Self {
        self.references.push(reference);
        self
    }

    /// Marks the schema as an embedded object type.
    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Validates and freezes the schema.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` on duplicate names, on references to
    /// undeclared foreign key fields, or on foreign key fields of the wrong
    /// kind.
    pub fn build(self) -> CoreResult<Arc<EntitySchema>> {
        let mut fields = Vec::with_capacity(self.fields.len() + 3);
        if !self.embedded {
            fields.extend([ID_KEY, KEY_KEY, REV_KEY].map(FieldDescriptor::any));
        }
        fields.extend(self.fields);

        let mut field_index = BTreeMap::new();
        for (i, field) in fields.iter().enumerate() {
            if field_index.insert(field.name().to_string(), i).is_some() {
                return Err(CoreError::invalid_operation(format!(
                    "{} declares field {} twice",
                    self.name,
                    field.name()
                )));
            }
        }

        let mut reference_index = BTreeMap::new();
        for (i, reference) in self.references.iter().enumerate() {
            if field_index.contains_key(reference.name())
                || reference_index
                    .insert(reference.name().to_string(), i)
                    .is_some()
            {
                return Err(CoreError::invalid_operation(format!(
                    "{} declares {} twice",
                    self.name,
                    reference.name()
                )));
            }
            let expected_list = match reference.kind() {
                ReferenceKind::Reference { .. } => false,
                ReferenceKind::ReferenceList { .. } => true,
                _ => continue,
            };
            let Some(fk) = reference.local_field() else {
                continue;
            };
            let field = field_index
                .get(fk)
                .map(|&i| &mut fields[i])
                .ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "reference {}.{} uses undeclared field {fk}",
                        self.name,
                        reference.name()
                    ))
                })?;
            let kind_matches = if expected_list {
                matches!(field.kind(), FieldKind::ReferenceIdList)
            } else {
                field.is_reference_id()
            };
            if !kind_matches {
                return Err(CoreError::invalid_operation(format!(
                    "field {}.{fk} cannot back reference {}",
                    self.name,
                    reference.name()
                )));
            }
            field.link_reference(reference.name());
        }

        let collection = self
            .collection
            .unwrap_or_else(|| pluralize(&self.name.to_case(Case::Snake)));

        Ok(Arc::new(EntitySchema {
            name: self.name,
            collection,
            fields,
            field_index,
            references: self.references,
            reference_index,
            embedded: self.embedded,
        }))
    }
}

/// English plural of a snake_case name (`order_line` -> `order_lines`).
fn pluralize(word: &str) -> String {
    const SIBILANT: [&str; 5] = ["s", "x", "z", "ch", "sh"];
    if let Some(stem) = word.strip_suffix('y') {
        let before_y = stem.chars().last();
        if before_y.is_some_and(|c| !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }
    if SIBILANT.iter().any(|suffix| word.ends_with(suffix)) {
        return format!("{word}es");
    }
    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::reference::ReferenceDescriptor;

    #[test]
    fn collection_names() {
        assert_eq!(pluralize("order_line"), "order_lines");
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("batch"), "batches");

        let schema = EntitySchema::builder("OrderLine").build().unwrap();
        assert_eq!(schema.collection(), "order_lines");
        let schema = EntitySchema::builder("Person")
            .collection("people")
            .build()
            .unwrap();
        assert_eq!(schema.collection(), "people");
    }

    #[test]
    fn identity_fields_are_implicit() {
        let schema = EntitySchema::builder("Customer")
            .field(FieldDescriptor::string("name"))
            .build()
            .unwrap();
        let names: Vec<_> = schema.fields().map(FieldDescriptor::name).collect();
        assert_eq!(names, vec!["_id", "_key", "_rev", "name"]);

        let embedded = EntitySchema::builder("Address")
            .embedded()
            .field(FieldDescriptor::string("city"))
            .build()
            .unwrap();
        assert_eq!(embedded.fields().count(), 1);
    }

    #[test]
    fn references_link_their_field() {
        let schema = EntitySchema::builder("Order")
            .field(FieldDescriptor::reference_id("customer_id"))
            .reference(ReferenceDescriptor::reference(
                "customer",
                "customer_id",
                "Customer",
            ))
            .build()
            .unwrap();
        assert_eq!(
            schema.field("customer_id").unwrap().ref_name(),
            Some("customer")
        );
        assert_eq!(schema.foreign_key_of("customer"), Some("customer_id"));
        assert_eq!(schema.foreign_key_of("customer_id"), Some("customer_id"));
    }

    #[test]
    fn reference_to_missing_field_fails() {
        let result = EntitySchema::builder("Order")
            .reference(ReferenceDescriptor::reference(
                "customer",
                "customer_id",
                "Customer",
            ))
            .build();
        assert!(matches!(result, Err(CoreError::InvalidOperation { .. })));
    }

    #[test]
    fn reference_list_needs_id_list() {
        let result = EntitySchema::builder("Order")
            .field(FieldDescriptor::reference_id("product_ids"))
            .reference(ReferenceDescriptor::reference_list(
                "products",
                "product_ids",
                "Product",
            ))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn path_walks_embedded_objects() {
        let address = EntitySchema::builder("Address")
            .embedded()
            .field(FieldDescriptor::string("city"))
            .build()
            .unwrap();
        let shipping = EntitySchema::builder("Shipping")
            .embedded()
            .field(FieldDescriptor::object("address", address))
            .build()
            .unwrap();
        let order = EntitySchema::builder("Order")
            .field(FieldDescriptor::object("shipping", shipping))
            .build()
            .unwrap();

        let city = order.path("shipping.address.city").unwrap();
        assert_eq!(city.path(), "shipping.address.city");
        assert_eq!(city.eq("Graz").path, "shipping.address.city");
        assert!(order.path("shipping.nope").is_err());
        assert!(order.path("_key.x").is_err());
    }
}
