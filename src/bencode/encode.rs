//! Canonical bencode encoding.
//!
//! Dictionaries are always written with keys in ascending byte order, so
//! re-encoding a decoded canonical message reproduces it byte for byte.

use bytes::BufMut;

use super::value::Value;

/// Encode a value into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_to(value, &mut out);
    out
}

/// Append the encoding of `value` to `out`.
pub fn encode_to<B: BufMut>(value: &Value, out: &mut B) {
    match value {
        Value::Integer(n) => {
            out.put_u8(b'i');
            out.put_slice(n.to_string().as_bytes());
            out.put_u8(b'e');
        }
        Value::ByteString(bytes) => put_bytes(bytes, out),
        Value::List(items) => {
            out.put_u8(b'l');
            for item in items {
                encode_to(item, out);
            }
            out.put_u8(b'e');
        }
        Value::Dictionary(dict) => {
            out.put_u8(b'd');
            // BTreeMap iteration is ascending by raw key bytes
            for (key, item) in dict {
                put_bytes(key, out);
                encode_to(item, out);
            }
            out.put_u8(b'e');
        }
    }
}

fn put_bytes<B: BufMut>(bytes: &[u8], out: &mut B) {
    out.put_slice(bytes.len().to_string().as_bytes());
    out.put_u8(b':');
    out.put_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::value::{DictBuilder, Dict};

    #[test]
    fn test_encode_integers() {
        assert_eq!(encode(&Value::Integer(0)), b"i0e");
        assert_eq!(encode(&Value::Integer(42)), b"i42e");
        assert_eq!(encode(&Value::Integer(-7)), b"i-7e");
        assert_eq!(encode(&Value::Integer(i64::MIN)), b"i-9223372036854775808e");
        assert_eq!(encode(&Value::Integer(i64::MAX)), b"i9223372036854775807e");
    }

    #[test]
    fn test_encode_byte_string_binary_safe() {
        assert_eq!(encode(&Value::from("spam")), b"4:spam");
        assert_eq!(encode(&Value::from("")), b"0:");
        assert_eq!(encode(&Value::ByteString(vec![0, 0xff, b':'])), b"3:\x00\xff:");
    }

    #[test]
    fn test_encode_list_preserves_order() {
        let value = Value::List(vec![Value::from("b"), Value::Integer(1), Value::from("a")]);
        assert_eq!(encode(&value), b"l1:bi1e1:ae");
    }

    #[test]
    fn test_encode_dictionary_sorted_regardless_of_insertion() {
        let mut dict = Dict::new();
        dict.insert(b"zeta".to_vec(), Value::Integer(1));
        dict.insert(b"alpha".to_vec(), Value::Integer(2));
        dict.insert(b"Beta".to_vec(), Value::Integer(3));
        assert_eq!(encode(&Value::Dictionary(dict)), b"d4:Betai3e5:alphai2e4:zetai1ee");
    }

    #[test]
    fn test_encode_keys_sorted_by_raw_bytes() {
        // 0x80 sorts after ASCII even though it is not valid UTF-8
        let mut dict = Dict::new();
        dict.insert(vec![0x80], Value::Integer(1));
        dict.insert(b"z".to_vec(), Value::Integer(2));
        dict.insert(b"id".to_vec(), Value::Integer(3));
        assert_eq!(encode(&Value::Dictionary(dict)), b"d2:idi3e1:zi2e1:\x80i1ee");
    }

    #[test]
    fn test_encode_scenario_dictionary() {
        let value = DictBuilder::new().insert("name", "ubuntu.iso").insert("id", 7).build();
        assert_eq!(encode(&value), b"d2:idi7e4:name10:ubuntu.isoe");
    }

    #[test]
    fn test_encode_to_appends() {
        let mut out = b"prefix".to_vec();
        encode_to(&Value::Integer(1), &mut out);
        assert_eq!(out, b"prefixi1e");
    }
}
