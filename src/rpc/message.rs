// src/rpc/message.rs
//! JSON-RPC 2.0 wire types.
//!
//! Request:  `{ "jsonrpc": "2.0", "id", "method", "params"? }`
//! Response: `{ "jsonrpc": "2.0", "id", "result" }` or
//!           `{ "jsonrpc": "2.0", "id", "error": { "code", "message", "data"? } }`

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const JSON_RPC_VERSION: &str = "2.0";

/// Largest integer a JavaScript peer can represent exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Correlation id of a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    Number(u64),
    String(String),
}

impl RpcId {
    /// Uniform random id in `[0, 2^53)`.
    pub fn random() -> Self {
        RpcId::Number(rand::thread_rng().gen_range(0..=MAX_SAFE_INTEGER))
    }

    /// Reads an id from a JSON value. `null` and other types are not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => number.as_u64().map(RpcId::Number),
            Value::String(text) => Some(RpcId::String(text.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcId::Number(number) => write!(f, "{}", number),
            RpcId::String(text) => f.write_str(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RpcId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    pub fn new(id: RpcId, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcOutcome {
    Result(Value),
    Error(RpcErrorObject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Option<RpcId>,
    #[serde(flatten)]
    pub outcome: RpcOutcome,
}

impl RpcResponse {
    pub fn success(id: Option<RpcId>, result: Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            outcome: RpcOutcome::Result(result),
        }
    }

    pub fn failure(id: Option<RpcId>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            outcome: RpcOutcome::Error(RpcErrorObject {
                code,
                message: message.into(),
                data,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_random_ids_are_safe_integers() {
        for _ in 0..100 {
            match RpcId::random() {
                RpcId::Number(n) => assert!(n <= MAX_SAFE_INTEGER),
                other => panic!("unexpected id {:?}", other),
            }
        }
    }

    #[test]
    fn test_request_omits_absent_params() {
        let request = RpcRequest::new(RpcId::Number(7), "eth_chainId", None);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"jsonrpc": "2.0", "id": 7, "method": "eth_chainId"})
        );
    }

    #[test]
    fn test_response_wire_format() {
        let ok = RpcResponse::success(Some(RpcId::String("a".into())), json!(null));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"jsonrpc": "2.0", "id": "a", "result": null})
        );

        let err = RpcResponse::failure(None, 4001, "User rejected", None);
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": 4001, "message": "User rejected"}})
        );
    }

    #[test]
    fn test_id_from_value() {
        assert_eq!(RpcId::from_value(&json!(12)), Some(RpcId::Number(12)));
        assert_eq!(RpcId::from_value(&json!("x")), Some(RpcId::String("x".into())));
        assert_eq!(RpcId::from_value(&json!(null)), None);
        assert_eq!(RpcId::Number(12).to_string(), "12");
    }
}
