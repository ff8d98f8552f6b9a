//! Opaque pagination cursors.
//!
//! A [`PageKey`] is the resume point handed back by a store when a listing
//! stops mid-way: a mapping of attribute name → value whose contents only
//! the store that produced it understands. On the wire it travels as
//! URL-safe base64 over canonical JSON; decoding validates shape and fails
//! with a validation error on malformed input instead of crashing.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::error::{Error, Result};

/// Resume point for cursor pagination.
pub type PageKey = BTreeMap<String, serde_json::Value>;

/// Encode a cursor key for external callers.
pub fn encode_cursor(key: &PageKey) -> String {
    // Serializing a string-keyed map cannot fail.
    let json = serde_json::to_vec(key).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode an externally supplied cursor.
///
/// # Errors
///
/// [`Error::Validation`] if the input is not base64, not JSON, or not a
/// JSON object.
pub fn decode_cursor(encoded: &str) -> Result<PageKey> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|e| Error::Validation(format!("malformed cursor: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::Validation(format!("malformed cursor: {e}")))
}

/// Read a required integer attribute out of a cursor key.
pub(crate) fn cursor_i64(key: &PageKey, field: &str) -> Result<i64> {
    key.get(field)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::Validation(format!("cursor is missing integer field '{field}'")))
}

/// Read a required string attribute out of a cursor key.
pub(crate) fn cursor_str(key: &PageKey, field: &str) -> Result<String> {
    key.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Validation(format!("cursor is missing string field '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> PageKey {
        let mut key = PageKey::new();
        key.insert("created_at".to_string(), serde_json::json!(1_700_000_000));
        key.insert("id".to_string(), serde_json::json!("job-42"));
        key
    }

    #[test]
    fn test_roundtrip() {
        let key = sample_key();
        let encoded = encode_cursor(&key);
        let decoded = decode_cursor(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_encoded_form_is_url_safe() {
        let encoded = encode_cursor(&sample_key());
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
        assert!(!encoded.contains('='));
    }

    #[test]
    fn test_malformed_base64_is_validation_error() {
        let err = decode_cursor("not base64 at all!!").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_non_object_json_is_validation_error() {
        let encoded = URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        let err = decode_cursor(&encoded).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_field_accessors() {
        let key = sample_key();
        assert_eq!(cursor_i64(&key, "created_at").unwrap(), 1_700_000_000);
        assert_eq!(cursor_str(&key, "id").unwrap(), "job-42");
        assert!(cursor_i64(&key, "missing").is_err());
        assert!(cursor_str(&key, "created_at").is_err());
    }
}
