//! Canonical JSON encoding and SHA-256 digests.
//!
//! Every hash in the ledger is taken over canonical JSON:
//! - object keys sorted by code point
//! - compact separators (`,` and `:` with no whitespace)
//! - ASCII-only output: control characters and non-ASCII escaped as `\uXXXX`
//!
//! Key order is applied here rather than inherited from `serde_json::Map`,
//! so the encoding does not depend on which map backend is compiled in.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Encode a JSON value canonically.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Encode any serializable value canonically.
///
/// Values serde cannot represent as JSON (non-finite floats) are encoded as
/// `null`, matching `serde_json::to_value`.
pub fn to_canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(to_canonical_string(&serde_json::to_value(value)?))
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of the canonical encoding of a value.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(to_canonical_string(value).as_bytes())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (c as u32) > 0x7f => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04x}", unit));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    #[test]
    fn test_keys_sorted_and_compact() {
        let value = json!({"b": 1, "a": [true, null, "x"], "c": {"z": 1.5, "y": -2}});
        assert_eq!(
            to_canonical_string(&value),
            r#"{"a":[true,null,"x"],"b":1,"c":{"y":-2,"z":1.5}}"#
        );
    }

    #[test]
    fn test_non_ascii_escaped() {
        let value = json!("café ☕ 𝄞");
        assert_eq!(
            to_canonical_string(&value),
            r#""caf\u00e9 \u2615 \ud834\udd1e""#
        );
    }

    #[test]
    fn test_control_characters_escaped() {
        let value = json!("a\"b\\c\nd\u{01}");
        assert_eq!(to_canonical_string(&value), r#""a\"b\\c\nd\u0001""#);
    }

    #[test]
    fn test_delete_character_left_literal() {
        let value = json!("a\u{7f}b\u{80}");
        assert_eq!(to_canonical_string(&value), "\"a\u{7f}b\\u0080\"");
    }

    #[test]
    fn test_canonical_output_parses_back() {
        let value = json!({"name": "Ünïcode", "items": [1, 2.25, "three"]});
        let text = to_canonical_string(&value);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, value);
        assert!(text.is_ascii());
    }

    #[test]
    fn test_non_finite_float_encodes_as_null() {
        let text = to_canonical_json(&vec![f64::NAN, 1.0]).unwrap();
        assert_eq!(text, "[null,1.0]");
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    fn nested(entries: &[(String, (i64, String))], reverse: bool) -> Value {
        let mut outer = Map::new();
        let ordered: Vec<&(String, (i64, String))> = if reverse {
            entries.iter().rev().collect()
        } else {
            entries.iter().collect()
        };
        for (key, (n, text)) in ordered {
            let mut inner = Map::new();
            let fields = [
                ("n".to_string(), json!(n)),
                ("text".to_string(), json!(text)),
                ("deeper".to_string(), json!({"k\u{e9}y": [text, n], "a": null})),
            ];
            if reverse {
                for (k, v) in fields.into_iter().rev() {
                    inner.insert(k, v);
                }
            } else {
                for (k, v) in fields {
                    inner.insert(k, v);
                }
            }
            outer.insert(key.clone(), Value::Object(inner));
        }
        Value::Object(outer)
    }

    proptest! {
        #[test]
        fn prop_hash_ignores_insertion_order(
            entries in proptest::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..12)
        ) {
            let mut forward = Map::new();
            for (k, v) in entries.iter() {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = Map::new();
            for (k, v) in entries.iter().rev() {
                backward.insert(k.clone(), json!(v));
            }
            prop_assert_eq!(
                hash_value(&Value::Object(forward)),
                hash_value(&Value::Object(backward))
            );
        }

        #[test]
        fn prop_nested_unicode_hash_is_order_independent(
            entries in proptest::collection::btree_map(
                "[a-z\u{e9}\u{4e2d}\u{1f600}]{1,5}",
                (any::<i64>(), "\\PC{0,12}"),
                0..8,
            )
        ) {
            let entries: Vec<(String, (i64, String))> = entries.into_iter().collect();
            let forward = nested(&entries, false);
            let backward = nested(&entries, true);

            let text = to_canonical_string(&forward);
            prop_assert!(text.is_ascii());
            prop_assert_eq!(&text, &to_canonical_string(&backward));
            prop_assert_eq!(hash_value(&forward), hash_value(&backward));

            let parsed: Value = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(parsed, forward);
        }
    }
}
