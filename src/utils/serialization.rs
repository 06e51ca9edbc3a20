// src/utils/serialization.rs
//! JSON helpers for channel and RPC messages.

use crate::error::ChannelError;
use serde::Serialize;
use serde_json::{Map, Value};

/// Converts a message into a JSON value ready to post.
///
/// # Errors
/// [`ChannelError::Malformed`] if the value cannot be represented as JSON
pub fn to_message_value<T: Serialize>(data: &T) -> Result<Value, ChannelError> {
    serde_json::to_value(data).map_err(|e| ChannelError::Malformed(e.to_string()))
}

/// Copies the fields of `data` into a new object and sets `key` to `value`.
///
/// Non-object data (including `null`) contributes no fields.
pub fn with_field(data: &Value, key: &str, value: Value) -> Value {
    let mut map = match data {
        Value::Object(fields) => fields.clone(),
        _ => Map::new(),
    };
    map.insert(key.to_string(), value);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[test]
    fn test_with_field_merges_objects() {
        let merged = with_field(&json!({"result": "0x01", "error": null}), "id", json!(7));
        assert_eq!(merged, json!({"result": "0x01", "error": null, "id": 7}));
        assert_eq!(with_field(&Value::Null, "id", json!("a")), json!({"id": "a"}));
    }

    #[test]
    fn test_non_string_map_keys_are_malformed() {
        let mut map = BTreeMap::new();
        map.insert(vec![1u8], "x");
        assert!(matches!(to_message_value(&map), Err(ChannelError::Malformed(_))));
    }
}
