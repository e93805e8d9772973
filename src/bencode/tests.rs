//! Property tests over arbitrary value trees.

use proptest::prelude::*;

use super::*;
use crate::error::ParseError;

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        prop::collection::vec(any::<u8>(), 0..24).prop_map(Value::ByteString),
    ];
    leaf.prop_recursive(4, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            prop::collection::btree_map(prop::collection::vec(any::<u8>(), 0..6), inner, 0..6)
                .prop_map(Value::Dictionary),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn roundtrip(value in value_strategy()) {
        let bytes = encode(&value);
        let (decoded, consumed) = decode(&bytes).unwrap_or_else(|e| panic!("decode failed: {e}"));
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn reencode_is_byte_identical(value in value_strategy()) {
        let bytes = encode(&value);
        let decoded = DecodeOptions::strict()
            .decode_exact(&bytes)
            .unwrap_or_else(|e| panic!("strict decode failed: {e}"));
        prop_assert!(decoded.is_canonical());
        prop_assert_eq!(encode(&decoded.value), bytes);
    }

    #[test]
    fn proper_prefix_is_truncated(value in value_strategy()) {
        let bytes = encode(&value);
        for end in 1..bytes.len() {
            prop_assert_eq!(decode(&bytes[..end]), Err(ParseError::TruncatedInput));
        }
    }

    #[test]
    fn dictionary_order_independent(pairs in prop::collection::vec((prop::collection::vec(any::<u8>(), 0..6), any::<i64>()), 0..10)) {
        let mut forward = Dict::new();
        let mut backward = Dict::new();
        for (key, n) in &pairs {
            forward.entry(key.clone()).or_insert(Value::Integer(*n));
        }
        for (key, value) in forward.iter().rev() {
            backward.insert(key.clone(), value.clone());
        }
        prop_assert_eq!(encode(&Value::Dictionary(forward)), encode(&Value::Dictionary(backward)));
    }
}
