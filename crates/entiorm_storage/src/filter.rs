//! Query filter expressions.
//!
//! A [`Filter`] describes one comparison: a property path, an operator and an
//! operand. Filters are built by field descriptors in the core crate and are
//! translated by each adapter into its own predicate language. They carry no
//! rendering logic of their own.

use entiorm_codec::Value;
use std::fmt;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// `path == operand`
    Eq,
    /// `path <= operand`
    Le,
    /// `path >= operand`
    Ge,
    /// `path < operand`
    Lt,
    /// `path > operand`
    Gt,
    /// The value at `path` is (or is not) one of the operand's items.
    In,
    /// The list at `path` does (or does not) contain the operand.
    Contains,
    /// A sub-property of the value at `path` equals the operand.
    HasProp,
    /// The length of the list at `path` equals the operand.
    LenEq,
}

impl FilterOp {
    /// Short operator name, as used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Le => "le",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::In => "in_",
            Self::Contains => "contains_",
            Self::HasProp => "has_prop",
            Self::LenEq => "len_eq",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A plain value (comparisons and `len_eq`).
    Value(Value),
    /// A membership test; `is_in == false` negates it.
    Membership {
        /// The list (for `in_`) or the element (for `contains_`).
        value: Value,
        /// Whether membership is required or forbidden.
        is_in: bool,
    },
    /// A sub-property comparison for `has_prop`.
    Property {
        /// Name of the sub-property.
        name: String,
        /// Expected value.
        value: Value,
    },
}

/// One comparison over a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Dot-separated property path.
    pub path: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Right-hand side.
    pub operand: Operand,
    /// Combine with the preceding filters using OR instead of AND.
    pub or: bool,
}

impl Filter {
    /// Creates a filter.
    pub fn new(path: impl Into<String>, op: FilterOp, operand: Operand) -> Self {
        Self {
            path: path.into(),
            op,
            operand,
            or: false,
        }
    }

    /// `path == value`.
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(path, FilterOp::Eq, Operand::Value(value.into()))
    }

    /// Marks this filter as OR-combined with the filters before it.
    #[must_use]
    pub fn or_(mut self) -> Self {
        self.or = true;
        self
    }

    /// Evaluates the filter against a record value.
    ///
    /// A missing path reads as null. Ordered comparisons between values of
    /// unrelated types are false.
    #[must_use]
    pub fn matches(&self, record: &Value) -> bool {
        let current = record.get_path(&self.path).unwrap_or(&Value::Null);
        match (&self.op, &self.operand) {
            (FilterOp::Eq, Operand::Value(v)) => current.loose_eq(v),
            (FilterOp::Le, Operand::Value(v)) => current.compare(v).is_some_and(|o| o.is_le()),
            (FilterOp::Ge, Operand::Value(v)) => current.compare(v).is_some_and(|o| o.is_ge()),
            (FilterOp::Lt, Operand::Value(v)) => current.compare(v).is_some_and(|o| o.is_lt()),
            (FilterOp::Gt, Operand::Value(v)) => current.compare(v).is_some_and(|o| o.is_gt()),
            (FilterOp::In, Operand::Membership { value, is_in }) => {
                let found = value
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| item.loose_eq(current)));
                found == *is_in
            }
            (FilterOp::Contains, Operand::Membership { value, is_in }) => {
                let found = current
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| item.loose_eq(value)));
                found == *is_in
            }
            (FilterOp::HasProp, Operand::Property { name, value }) => current
                .get_path(name)
                .is_some_and(|sub| sub.loose_eq(value)),
            (FilterOp::LenEq, Operand::Value(v)) => {
                match (current.len(), v.as_integer()) {
                    (Some(len), Some(expected)) => {
                        i64::try_from(len).is_ok_and(|len| len == expected)
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.or {
            f.write_str("OR ")?;
        }
        match &self.operand {
            Operand::Value(v) => write!(f, "{} {} {}", self.path, self.op, v),
            Operand::Membership { value, is_in } => {
                let neg = if *is_in { "" } else { "not " };
                write!(f, "{} {}{} {}", self.path, neg, self.op, value)
            }
            Operand::Property { name, value } => {
                write!(f, "{}.{} {} {}", self.path, name, self.op, value)
            }
        }
    }
}

/// Evaluates a filter list with left-fold combination.
///
/// The first filter seeds the result; each following filter is combined with
/// AND, or with OR when its `or` flag is set. An empty list matches
/// everything.
#[must_use]
pub fn matches_all(filters: &[Filter], record: &Value) -> bool {
    let mut iter = filters.iter();
    let Some(first) = iter.next() else {
        return true;
    };
    iter.fold(first.matches(record), |acc, filter| {
        if filter.or {
            acc || filter.matches(record)
        } else {
            acc && filter.matches(record)
        }
    })
}
