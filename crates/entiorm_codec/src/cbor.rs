//! CBOR encoding and decoding of document values.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use crate::view::ObjectView;

/// Maximum nesting depth accepted when checking a value before encoding.
const MAX_DEPTH: usize = 128;

/// Encode a value to CBOR bytes.
///
/// Maps are written in key order, so equal values always produce identical
/// bytes.
///
/// # Errors
///
/// Returns an error if the value contains a NaN float, nests deeper than
/// the supported limit, or the encoder fails.
pub fn to_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    check_encodable(value, 0)?;
    let mut buffer = Vec::new();
    ciborium::into_writer(value, &mut buffer)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buffer)
}

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or use a construct that
/// has no document representation (tags, non-text map keys).
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Encode a record to CBOR bytes.
///
/// # Errors
///
/// See [`to_cbor`].
pub fn record_to_cbor(view: &ObjectView) -> CodecResult<Vec<u8>> {
    to_cbor(&view.to_value())
}

/// Decode a record from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are invalid or do not hold a map.
pub fn record_from_cbor(bytes: &[u8]) -> CodecResult<ObjectView> {
    ObjectView::try_from(from_cbor(bytes)?)
}

fn check_encodable(value: &Value, depth: usize) -> CodecResult<()> {
    if depth > MAX_DEPTH {
        return Err(CodecError::encoding_failed(format!(
            "value nests deeper than {MAX_DEPTH} levels"
        )));
    }
    match value {
        Value::Float(f) if f.is_nan() => Err(CodecError::NaNForbidden),
        Value::Array(items) => items
            .iter()
            .try_for_each(|item| check_encodable(item, depth + 1)),
        Value::Map(map) => map
            .values()
            .try_for_each(|item| check_encodable(item, depth + 1)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn roundtrip_nested() {
        let value = Value::map([
            (
                "users",
                Value::array([
                    Value::map([("name", Value::from("Alice")), ("age", Value::Integer(30))]),
                    Value::map([("name", Value::from("Bob")), ("age", Value::Integer(25))]),
                ]),
            ),
            ("count", Value::Integer(2)),
            ("ratio", Value::Float(0.5)),
            ("secret", Value::bytes(vec![1, 2, 3])),
        ]);
        let bytes = to_cbor(&value).unwrap();
        assert_eq!(from_cbor(&bytes).unwrap(), value);
    }

    #[test]
    fn bytes_stay_bytes() {
        let bytes = to_cbor(&Value::bytes(vec![9, 8, 7])).unwrap();
        // Major type 2 (byte string) of length 3.
        assert_eq!(bytes[0], 0x43);
    }

    #[test]
    fn nan_is_rejected() {
        let err = to_cbor(&Value::array([Value::Float(f64::NAN)])).unwrap_err();
        assert_eq!(err, CodecError::NaNForbidden);
    }

    #[test]
    fn deterministic_encoding() {
        let a = Value::map([("b", Value::Integer(2)), ("a", Value::Integer(1))]);
        let b = Value::map([("a", Value::Integer(1)), ("b", Value::Integer(2))]);
        assert_eq!(to_cbor(&a).unwrap(), to_cbor(&b).unwrap());
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(from_cbor(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn record_requires_map() {
        let bytes = to_cbor(&Value::Integer(1)).unwrap();
        assert!(matches!(
            record_from_cbor(&bytes),
            Err(CodecError::NotAMap { type_name: "integer" })
        ));
    }

    fn leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1.0e9f64..1.0e9).prop_map(Value::Float),
            "[a-z0-9 ]{0,12}".prop_map(Value::Text),
            prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ]
    }

    fn value_strategy() -> impl Strategy<Value = Value> {
        leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_cbor_roundtrip(value in value_strategy()) {
            let bytes = to_cbor(&value).unwrap();
            prop_assert_eq!(from_cbor(&bytes).unwrap(), value);
        }
    }
}
