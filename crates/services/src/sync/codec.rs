//! Remote-boundary encoding of progress keys and maps.
//!
//! Push-style stores reject some characters in path segments, so keys are
//! percent-encoded on the way out and decoded on the way in. In-memory keys
//! are never escaped.

use serde_json::{Map, Value};
use std::fmt::Write;
use tracing::warn;

use storage::progress::{insert_canonical, normalize_map};
use vocab_core::model::{ProgressKey, ProgressMap};

use crate::error::KeyDecodeError;

const RESERVED: &[u8] = b"%.#$/[]|";

fn needs_escape(byte: u8) -> bool {
    RESERVED.contains(&byte) || byte.is_ascii_control()
}

/// Percent-encode reserved and control characters of `key`.
#[must_use]
pub fn encode_key(key: &ProgressKey) -> String {
    let raw = key.as_str();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match u8::try_from(ch) {
            Ok(byte) if needs_escape(byte) => {
                let _ = write!(out, "%{byte:02X}");
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`encode_key`].
///
/// # Errors
///
/// Returns `KeyDecodeError` for truncated or non-hex escapes, or when the
/// decoded bytes are not UTF-8.
pub fn decode_key(encoded: &str) -> Result<ProgressKey, KeyDecodeError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let hex = encoded
            .get(i + 1..i + 3)
            .filter(|digits| digits.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|digits| u8::from_str_radix(digits, 16).ok())
            .ok_or_else(|| KeyDecodeError::InvalidEscape {
                key: encoded.to_owned(),
                position: i,
            })?;
        out.push(hex);
        i += 3;
    }
    String::from_utf8(out)
        .map(ProgressKey::from_raw)
        .map_err(|_| KeyDecodeError::InvalidUtf8 {
            key: encoded.to_owned(),
        })
}

/// Progress map with remote-safe keys.
///
/// # Errors
///
/// Returns `serde_json::Error` if a record cannot be serialized.
pub fn encode_map(progress: &ProgressMap) -> Result<Value, serde_json::Error> {
    let mut out = Map::with_capacity(progress.len());
    for (key, record) in progress {
        out.insert(encode_key(key), serde_json::to_value(record)?);
    }
    Ok(Value::Object(out))
}

/// Decode and normalize a remote progress map.
///
/// Keys that fail to decode are dropped with a warning; a non-object value
/// decodes as empty. Legacy direction names are rewritten.
#[must_use]
pub fn decode_map(value: &Value) -> ProgressMap {
    let Some(records) = normalize_map(value) else {
        return ProgressMap::new();
    };
    let mut decoded = ProgressMap::new();
    for (key, record) in records {
        match decode_key(key.as_str()) {
            Ok(key) => insert_canonical(&mut decoded, key, record),
            Err(err) => warn!(error = %err, "dropping remote progress entry"),
        }
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vocab_core::model::{Direction, ProgressRecord};
    use vocab_core::time::fixed_now;

    #[test]
    fn reserved_characters_are_escaped() {
        let key = ProgressKey::new("a.b#c", "$/[x]", Direction::FrontToBack);
        let encoded = encode_key(&key);
        assert!(!encoded.contains(['.', '#', '$', '/', '[', ']', '|']));
        assert_eq!(decode_key(&encoded).unwrap(), key);
    }

    #[test]
    fn percent_and_unicode_survive() {
        let key = ProgressKey::new("100% año", "Straße\n", Direction::BackToFront);
        let encoded = encode_key(&key);
        assert!(encoded.contains("año"));
        assert!(encoded.contains("%25"));
        assert!(encoded.contains("%0A"));
        assert_eq!(decode_key(&encoded).unwrap(), key);
    }

    #[test]
    fn bad_escapes_are_rejected() {
        assert!(matches!(
            decode_key("abc%2"),
            Err(KeyDecodeError::InvalidEscape { position: 3, .. })
        ));
        assert!(decode_key("%zz").is_err());
        assert!(matches!(
            decode_key("%FF"),
            Err(KeyDecodeError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn map_round_trip_normalizes_and_drops_bad_keys() {
        let mut record = ProgressRecord::fresh();
        record.record_answer(true, fixed_now());
        let key = ProgressKey::new("el.gato", "die Katze", Direction::FrontToBack);
        let progress: ProgressMap = [(key.clone(), record.clone())].into();

        let mut encoded = encode_map(&progress).unwrap();
        encoded
            .as_object_mut()
            .unwrap()
            .insert("bad%G1".into(), json!({"correctCount": 1}));

        let decoded = decode_map(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[&key], record);
        assert!(decode_map(&json!("nope")).is_empty());
    }

    #[test]
    fn remote_legacy_keys_are_rewritten() {
        let legacy = encode_key(&ProgressKey::from_raw("perro||Hund||germanToSpanish"));
        let decoded = decode_map(&json!({ legacy: {"correctCount": 2} }));
        let key = ProgressKey::new("perro", "Hund", Direction::BackToFront);
        assert_eq!(decoded[&key].correct_count, 2);
    }
}
