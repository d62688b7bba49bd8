//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use entiorm_codec::Value;
use proptest::prelude::*;

/// Strategy for generating valid document keys.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for generating customer names, which are never empty.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{1,11}( [A-Z][a-z]{1,11})?").expect("Invalid regex")
}

/// Strategy for generating scalar values that survive a store round trip.
///
/// Floats are finite; integers stay within the range a float represents
/// exactly, since number fields store floats.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-(1i64 << 40)..(1i64 << 40)).prop_map(Value::Integer),
        (-1.0e9f64..1.0e9f64).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Text),
    ]
}

/// Strategy for generating dot paths such as `shipping.address.city`.
pub fn dot_path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        1..5,
    )
    .prop_map(|segments| segments.join("."))
}

/// Strategy for generating a random forest over `1..max` nodes.
///
/// Entry `i` is the parent index of node `i`, always smaller than `i`, so
/// the result never contains a cycle.
pub fn forest_strategy(max: usize) -> impl Strategy<Value = Vec<Option<usize>>> {
    prop::collection::vec(any::<Option<prop::sample::Index>>(), 1..max.max(2)).prop_map(
        |parents| {
            parents
                .into_iter()
                .enumerate()
                .map(|(i, parent)| match parent {
                    Some(index) if i > 0 => Some(index.index(i)),
                    _ => None,
                })
                .collect()
        },
    )
}

/// Strategy for generating a list of order line quantities.
pub fn order_lines_strategy() -> impl Strategy<Value = Vec<(String, u32)>> {
    prop::collection::vec(
        (
            prop::string::string_regex("SKU-[0-9]{3}").expect("Invalid regex"),
            1u32..50,
        ),
        0..8,
    )
}
