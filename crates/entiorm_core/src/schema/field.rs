//! Field descriptors and filter construction.

use crate::error::{CoreError, CoreResult};
use crate::schema::EntitySchema;
use entiorm_codec::Value;
use entiorm_storage::{Filter, FilterOp, Operand};
use std::fmt;
use std::sync::Arc;

/// Produces a fresh default value on every read.
pub type DefaultGenerator = Arc<dyn Fn() -> Value + Send + Sync>;

/// Default of a field that has no stored value.
#[derive(Clone, Default)]
pub enum FieldDefault {
    /// No default: the field reads as null (containers read as empty).
    #[default]
    None,
    /// A fixed value, cloned on every read.
    Value(Value),
    /// A generator, called on every read.
    Generator(DefaultGenerator),
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Item type of a list field.
#[derive(Debug, Clone)]
pub enum ListItem {
    /// Plain values.
    Scalar,
    /// Embedded objects following a schema.
    Object(Arc<EntitySchema>),
}

/// Storage kind of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Any value, stored as-is.
    Any,
    /// Text.
    String,
    /// A number; integers are stored as floats.
    Number,
    /// A boolean.
    Boolean,
    /// Secret bytes, stored as lowercase hex text.
    Password,
    /// An embedded object with its own declared fields.
    Object(Arc<EntitySchema>),
    /// A schemaless map whose missing keys read as `default`.
    Dict {
        /// Value of a missing key.
        default: Value,
    },
    /// A list of values or embedded objects.
    List(ListItem),
    /// A foreign key to one entity.
    ReferenceId {
        /// Store the full id (`collection/key`) instead of the key.
        use_full_id: bool,
    },
    /// A list of foreign keys.
    ReferenceIdList,
}

impl FieldKind {
    /// The value a container field reads as when nothing is stored.
    fn empty_container(&self) -> Option<Value> {
        match self {
            Self::Object(_) | Self::Dict { .. } => Some(Value::empty_map()),
            Self::List(_) | Self::ReferenceIdList => Some(Value::Array(Vec::new())),
            _ => None,
        }
    }
}

/// A declared field of an entity or embedded schema.
///
/// Comparison methods (`eq`, `lt`, `in_`, ...) do not compare anything: they
/// build a [`Filter`] over the field's property path.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    path: String,
    kind: FieldKind,
    default: FieldDefault,
    nullable: bool,
    hidden: bool,
    ref_name: Option<String>,
}

impl FieldDescriptor {
    /// Creates a nullable, visible field without default.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            kind,
            default: FieldDefault::None,
            nullable: true,
            hidden: false,
            ref_name: None,
        }
    }

    /// A field accepting any value.
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Any)
    }

    /// A text field.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// A numeric field.
    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    /// A boolean field.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// A password field holding bytes.
    pub fn password(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Password)
    }

    /// An embedded object field.
    pub fn object(name: impl Into<String>, schema: Arc<EntitySchema>) -> Self {
        Self::new(name, FieldKind::Object(schema))
    }

    /// A schemaless map field; missing keys read as null.
    pub fn dict(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKind::Dict {
                default: Value::Null,
            },
        )
    }

    /// A list of plain values.
    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::List(ListItem::Scalar))
    }

    /// A list of embedded objects.
    pub fn object_list(name: impl Into<String>, schema: Arc<EntitySchema>) -> Self {
        Self::new(name, FieldKind::List(ListItem::Object(schema)))
    }

    /// A foreign key holding the target's key.
    pub fn reference_id(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ReferenceId { use_full_id: false })
    }

    /// A foreign key holding the target's full id.
    pub fn full_reference_id(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ReferenceId { use_full_id: true })
    }

    /// A list of foreign keys.
    pub fn reference_id_list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::ReferenceIdList)
    }

    /// Sets a fixed default.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = FieldDefault::Value(value.into());
        self
    }

    /// Sets a default generator, called on every read of an unset field.
    #[must_use]
    pub fn default_with<F>(mut self, generator: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = FieldDefault::Generator(Arc::new(generator));
        self
    }

    /// Sets the per-key default of a dict field.
    #[must_use]
    pub fn dict_default(mut self, value: impl Into<Value>) -> Self {
        if let FieldKind::Dict { default } = &mut self.kind {
            *default = value.into();
        }
        self
    }

    /// Makes the field non-nullable.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Excludes the field from JSON export.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dot path of the field from the root entity.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Storage kind.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Whether the field may be null when serialized.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Whether the field is excluded from JSON export.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Name of the reference that uses this field as its foreign key.
    #[must_use]
    pub fn ref_name(&self) -> Option<&str> {
        self.ref_name.as_deref()
    }

    /// Returns `true` for foreign key fields.
    #[must_use]
    pub fn is_reference_id(&self) -> bool {
        matches!(self.kind, FieldKind::ReferenceId { .. })
    }

    pub(crate) fn link_reference(&mut self, reference: &str) {
        self.ref_name = Some(reference.to_string());
    }

    /// Returns a copy addressed below `prefix`.
    pub(crate) fn under(&self, prefix: &str) -> Self {
        let mut copy = self.clone();
        copy.path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix}.{}", self.name)
        };
        copy
    }

    /// The value an unset field reads as.
    ///
    /// Generators run on every call, so mutable defaults are never shared.
    #[must_use]
    pub fn default_value_or_null(&self) -> Value {
        match &self.default {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Generator(generate) => generate(),
            FieldDefault::None => self.kind.empty_container().unwrap_or(Value::Null),
        }
    }

    /// Converts an in-memory value to its stored form.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_db(&self, value: Value) -> Value {
        match (&self.kind, value) {
            (FieldKind::Number, Value::Integer(n)) => Value::Float(n as f64),
            (FieldKind::Password, Value::Bytes(bytes)) => Value::Text(hex::encode(bytes)),
            (_, value) => value,
        }
    }

    /// Converts a stored value to its in-memory form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` if a password is not valid hex.
    pub fn from_db(&self, value: Value) -> CoreResult<Value> {
        match (&self.kind, value) {
            (FieldKind::Password, Value::Text(text)) => hex::decode(&text)
                .map(Value::Bytes)
                .map_err(|e| CoreError::invalid_value(self.path.as_str(), e.to_string())),
            (_, value) => Ok(value),
        }
    }

    fn compare(&self, op: FilterOp, value: impl Into<Value>) -> Filter {
        Filter::new(
            self.path.as_str(),
            op,
            Operand::Value(self.to_db(value.into())),
        )
    }

    /// `field == value`
    pub fn eq(&self, value: impl Into<Value>) -> Filter {
        self.compare(FilterOp::Eq, value)
    }

    /// `field <= value`
    pub fn le(&self, value: impl Into<Value>) -> Filter {
        self.compare(FilterOp::Le, value)
    }

    /// `field >= value`
    pub fn ge(&self, value: impl Into<Value>) -> Filter {
        self.compare(FilterOp::Ge, value)
    }

    /// `field < value`
    pub fn lt(&self, value: impl Into<Value>) -> Filter {
        self.compare(FilterOp::Lt, value)
    }

    /// `field > value`
    pub fn gt(&self, value: impl Into<Value>) -> Filter {
        self.compare(FilterOp::Gt, value)
    }

    /// The field's value is one of `values`.
    pub fn in_(&self, values: impl Into<Value>) -> Filter {
        self.membership(FilterOp::In, values.into(), true)
    }

    /// The field's list contains `value`.
    pub fn contains_(&self, value: impl Into<Value>) -> Filter {
        self.membership(FilterOp::Contains, value.into(), true)
    }

    /// The sub-property `name` of the field's value equals `value`.
    pub fn has_prop(&self, name: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::new(
            self.path.as_str(),
            FilterOp::HasProp,
            Operand::Property {
                name: name.into(),
                value: value.into(),
            },
        )
    }

    /// The field's list has exactly `len` items.
    #[allow(clippy::cast_possible_wrap)]
    pub fn len_eq(&self, len: usize) -> Filter {
        Filter::new(
            self.path.as_str(),
            FilterOp::LenEq,
            Operand::Value(Value::Integer(len as i64)),
        )
    }

    /// Negated membership tests.
    #[must_use]
    pub fn not_(&self) -> Negated<'_> {
        Negated { field: self }
    }

    fn membership(&self, op: FilterOp, value: Value, is_in: bool) -> Filter {
        Filter::new(self.path.as_str(), op, Operand::Membership { value, is_in })
    }
}

/// Builder for negated membership filters, see [`FieldDescriptor::not_`].
#[derive(Debug, Clone, Copy)]
pub struct Negated<'a> {
    field: &'a FieldDescriptor,
}

impl Negated<'_> {
    /// The field's value is none of `values`.
    pub fn in_(&self, values: impl Into<Value>) -> Filter {
        self.field.membership(FilterOp::In, values.into(), false)
    }

    /// The field's list does not contain `value`.
    pub fn contains_(&self, value: impl Into<Value>) -> Filter {
        self.field.membership(FilterOp::Contains, value.into(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn eq_builds_filter() {
        let filter = FieldDescriptor::any("field").eq(5);
        assert_eq!(filter.path, "field");
        assert_eq!(filter.op, FilterOp::Eq);
        assert_eq!(filter.operand, Operand::Value(Value::Integer(5)));
        assert!(!filter.or);
    }

    #[test]
    fn negated_membership() {
        let filter = FieldDescriptor::any("field")
            .not_()
            .in_(Value::array([1, 2]));
        assert_eq!(filter.op, FilterOp::In);
        assert_eq!(
            filter.operand,
            Operand::Membership {
                value: Value::array([1, 2]),
                is_in: false,
            }
        );
    }

    #[test]
    fn number_comparisons_use_stored_form() {
        let filter = FieldDescriptor::number("total").ge(10);
        assert_eq!(filter.operand, Operand::Value(Value::Float(10.0)));
    }

    #[test]
    fn nested_path() {
        let city = FieldDescriptor::string("city").under("shipping.address");
        assert_eq!(city.lt("M").path, "shipping.address.city");
        assert_eq!(city.len_eq(3).op, FilterOp::LenEq);
    }

    #[test]
    fn generator_runs_per_read() {
        let counter = Arc::new(AtomicI64::new(0));
        let c = Arc::clone(&counter);
        let field = FieldDescriptor::number("seq")
            .default_with(move || Value::Integer(c.fetch_add(1, Ordering::SeqCst)));
        assert_eq!(field.default_value_or_null(), Value::Integer(0));
        assert_eq!(field.default_value_or_null(), Value::Integer(1));
    }

    #[test]
    fn containers_default_empty() {
        assert_eq!(
            FieldDescriptor::list("tags").default_value_or_null(),
            Value::Array(vec![])
        );
        assert_eq!(
            FieldDescriptor::dict("meta").default_value_or_null(),
            Value::empty_map()
        );
        assert_eq!(FieldDescriptor::string("x").default_value_or_null(), Value::Null);
    }

    #[test]
    fn password_conversion() {
        let field = FieldDescriptor::password("secret");
        let stored = field.to_db(Value::bytes(vec![0xca, 0xfe]));
        assert_eq!(stored, Value::from("cafe"));
        assert_eq!(field.from_db(stored).unwrap(), Value::bytes(vec![0xca, 0xfe]));
        assert!(field.from_db(Value::from("zz")).is_err());
    }
}
