// src/rpc/transport.rs
//! The cross-context messaging primitive (`postMessage`).

use serde_json::Value;

/// Something messages can be posted to, such as a parent window or an iframe.
pub trait MessageTarget: Send + Sync {
    /// Posts `message`, restricted to receivers whose origin is `target_origin`.
    fn post_message(&self, message: Value, target_origin: &str);
}
