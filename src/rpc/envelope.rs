// src/rpc/envelope.rs
//! Request/response correlation over a one-way message channel.
//!
//! Each call gets a random id and a pending entry. The entry is settled by
//! whichever comes first: a matching response or the timeout. Late
//! responses for settled ids are ignored. Once closed, an envelope refuses
//! new calls.

use crate::error::RpcError;
use crate::rpc::message::{RpcErrorObject, RpcId, RpcRequest, JSON_RPC_VERSION};
use crate::rpc::transport::MessageTarget;
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default time a call waits for its response.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(120_000);

type Completer = oneshot::Sender<Result<Value, RpcError>>;

#[derive(Default)]
struct PendingCalls {
    calls: HashMap<RpcId, Completer>,
    closed: bool,
}

/// Correlates JSON-RPC requests posted to a peer with the responses it posts back.
pub struct RpcEnvelope {
    target: Arc<dyn MessageTarget>,
    target_origin: String,
    wrapper_method: Option<String>,
    timeout: Duration,
    pending: Mutex<PendingCalls>,
}

impl RpcEnvelope {
    /// Creates an envelope posting to `target` restricted to `target_origin`.
    pub fn new(target: Arc<dyn MessageTarget>, target_origin: &str) -> Self {
        Self {
            target,
            target_origin: target_origin.to_string(),
            wrapper_method: None,
            timeout: DEFAULT_RPC_TIMEOUT,
            pending: Mutex::new(PendingCalls::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Posts requests as `{ "method": wrapper, "params": request }` instead of the bare request.
    pub fn wrapped_in(mut self, wrapper_method: &str) -> Self {
        self.wrapper_method = Some(wrapper_method.to_string());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().calls.len()
    }

    pub fn is_closed(&self) -> bool {
        self.pending().closed
    }

    /// Sends a request and waits for its response.
    ///
    /// # Arguments
    /// * `method` - JSON-RPC method name
    /// * `params` - Optional positional or named parameters
    ///
    /// # Errors
    /// - [`RpcError::Remote`] when the peer answered with an error object
    /// - [`RpcError::Timeout`] when no response arrived in time
    /// - [`RpcError::MalformedResponse`] for a response without `result` or `error`
    /// - [`RpcError::ChannelClosed`] when the envelope is closed, before or
    ///   while the call is pending
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let id = RpcId::random();
        let (sender, mut receiver) = oneshot::channel();
        {
            let mut pending = self.pending();
            if pending.closed {
                debug!("Refusing RPC {} on a closed envelope", method);
                return Err(RpcError::ChannelClosed);
            }
            pending.calls.insert(id.clone(), sender);
        }

        let request = RpcRequest::new(id.clone(), method, params);
        let message = match &self.wrapper_method {
            Some(wrapper) => json!({ "method": wrapper, "params": request }),
            None => json!(request),
        };
        debug!("Posting RPC {} with id {}", method, id);
        self.target.post_message(message, &self.target_origin);

        match tokio::time::timeout(self.timeout, &mut receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                if self.pending().calls.remove(&id).is_some() {
                    warn!("RPC {} with id {} timed out", method, id);
                    return Err(RpcError::Timeout {
                        id: id.to_string(),
                        millis: self.timeout.as_millis() as u64,
                    });
                }
                // A response settled the entry between the deadline and the lock.
                match receiver.try_recv() {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RpcError::ChannelClosed),
                }
            }
        }
    }

    /// Offers an inbound message to the envelope.
    ///
    /// Returns `true` when the message settled a pending call. Messages that
    /// are not JSON-RPC 2.0 or carry an unknown id are ignored.
    pub fn handle_message(&self, data: &Value) -> bool {
        if data.get("jsonrpc").and_then(Value::as_str) != Some(JSON_RPC_VERSION) {
            return false;
        }
        let id = match data.get("id").and_then(RpcId::from_value) {
            Some(id) => id,
            None => return false,
        };
        let completer = match self.pending().calls.remove(&id) {
            Some(completer) => completer,
            None => {
                debug!("Ignoring response for unknown RPC id {}", id);
                return false;
            }
        };

        let outcome = if let Some(error) = data.get("error") {
            Err(remote_error(error))
        } else if let Some(result) = data.get("result") {
            Ok(result.clone())
        } else {
            Err(RpcError::MalformedResponse { id: id.to_string() })
        };
        // The caller may have stopped waiting; nothing else to do then.
        let _ = completer.send(outcome);
        true
    }

    /// Closes the envelope and settles every pending call with `error`.
    ///
    /// Calls made afterwards fail with [`RpcError::ChannelClosed`] without
    /// posting anything. Returns how many calls were settled.
    pub fn reject_all(&self, error: RpcError) -> usize {
        let drained: Vec<Completer> = {
            let mut pending = self.pending();
            pending.closed = true;
            pending.calls.drain().map(|(_, c)| c).collect()
        };
        let count = drained.len();
        for completer in drained {
            let _ = completer.send(Err(error.clone()));
        }
        count
    }
}

fn remote_error(error: &Value) -> RpcError {
    match serde_json::from_value::<RpcErrorObject>(error.clone()) {
        Ok(object) => RpcError::Remote {
            code: object.code,
            message: object.message,
            data: object.data,
        },
        Err(_) => RpcError::Remote {
            code: -32603,
            message: error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
            data: error.get("data").cloned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTarget;

    fn envelope(target: &Arc<RecordingTarget>, timeout_ms: u64) -> Arc<RpcEnvelope> {
        Arc::new(
            RpcEnvelope::new(target.clone(), "https://engine.example")
                .with_timeout(Duration::from_millis(timeout_ms)),
        )
    }

    async fn posted_id(target: &RecordingTarget) -> Value {
        for _ in 0..100 {
            if let Some(message) = target.last() {
                return message["id"].clone();
            }
            tokio::task::yield_now().await;
        }
        panic!("nothing was posted");
    }

    #[tokio::test]
    async fn test_response_settles_call() {
        let target = RecordingTarget::new();
        let envelope = envelope(&target, 5_000);

        let call = tokio::spawn({
            let envelope = envelope.clone();
            async move { envelope.call("eth_blockNumber", None).await }
        });
        let id = posted_id(&target).await;
        assert_eq!(target.last_origin().as_deref(), Some("https://engine.example"));

        assert!(envelope.handle_message(&json!({"jsonrpc": "2.0", "id": id, "result": "0x10"})));
        assert_eq!(call.await.unwrap(), Ok(json!("0x10")));
        assert_eq!(envelope.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_response_rejects_call() {
        let target = RecordingTarget::new();
        let envelope = envelope(&target, 5_000);

        let call = tokio::spawn({
            let envelope = envelope.clone();
            async move { envelope.call("eth_sendTransaction", Some(json!([{}]))).await }
        });
        let id = posted_id(&target).await;
        envelope.handle_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": 4001, "message": "User rejected"}
        }));

        match call.await.unwrap() {
            Err(RpcError::Remote { code, message, .. }) => {
                assert_eq!(code, 4001);
                assert_eq!(message, "User rejected");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_response_after_timeout_is_ignored() {
        let target = RecordingTarget::new();
        let envelope = envelope(&target, 20);

        let outcome = envelope.call("eth_chainId", None).await;
        let id = target.last().unwrap()["id"].clone();
        match outcome {
            Err(RpcError::Timeout { id: timed_out, millis }) => {
                assert_eq!(timed_out, id.to_string());
                assert_eq!(millis, 20);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        assert!(!envelope.handle_message(&json!({"jsonrpc": "2.0", "id": id, "result": "0x1"})));
        assert_eq!(envelope.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_message_format() {
        let err = RpcError::Timeout {
            id: "42".into(),
            millis: 120_000,
        };
        assert_eq!(err.to_string(), "RPC ID \"42\" timed out after 120000 milliseconds");
    }

    #[tokio::test]
    async fn test_response_without_result_or_error() {
        let target = RecordingTarget::new();
        let envelope = envelope(&target, 5_000);

        let call = tokio::spawn({
            let envelope = envelope.clone();
            async move { envelope.call("eth_chainId", None).await }
        });
        let id = posted_id(&target).await;
        envelope.handle_message(&json!({"jsonrpc": "2.0", "id": id}));

        assert!(matches!(
            call.await.unwrap(),
            Err(RpcError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_ignores_other_versions_and_unknown_ids() {
        let target = RecordingTarget::new();
        let envelope = envelope(&target, 5_000);
        assert!(!envelope.handle_message(&json!({"jsonrpc": "1.0", "id": 1, "result": 1})));
        assert!(!envelope.handle_message(&json!({"jsonrpc": "2.0", "id": 1, "result": 1})));
        assert!(!envelope.handle_message(&json!({"method": "tokensUpdated"})));
    }

    #[tokio::test]
    async fn test_string_id_does_not_settle_numeric_call() {
        let target = RecordingTarget::new();
        let envelope = envelope(&target, 5_000);

        let call = tokio::spawn({
            let envelope = envelope.clone();
            async move { envelope.call("eth_chainId", None).await }
        });
        let id = posted_id(&target).await;
        let as_text = Value::String(id.as_u64().unwrap().to_string());

        assert!(!envelope.handle_message(&json!({"jsonrpc": "2.0", "id": as_text, "result": "0x5"})));
        assert_eq!(envelope.pending_count(), 1);
        assert!(envelope.handle_message(&json!({"jsonrpc": "2.0", "id": id, "result": "0x1"})));
        assert_eq!(call.await.unwrap(), Ok(json!("0x1")));
    }

    #[tokio::test]
    async fn test_call_after_reject_all_fails_immediately() {
        let target = RecordingTarget::new();
        let envelope = envelope(&target, 60_000);
        assert_eq!(envelope.reject_all(RpcError::ChannelClosed), 0);
        assert!(envelope.is_closed());

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            envelope.call("eth_accounts", None),
        )
        .await
        .expect("closed envelope must not wait for the rpc timeout");
        assert_eq!(outcome, Err(RpcError::ChannelClosed));
        assert!(target.messages().is_empty());
        assert_eq!(envelope.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_wrapped_requests_and_reject_all() {
        let target = RecordingTarget::new();
        let envelope = Arc::new(
            RpcEnvelope::new(target.clone(), "https://engine.example").wrapped_in("ethRpc"),
        );

        let call = tokio::spawn({
            let envelope = envelope.clone();
            async move { envelope.call("eth_accounts", None).await }
        });
        for _ in 0..100 {
            if envelope.pending_count() == 1 && target.last().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let message = target.last().unwrap();
        assert_eq!(message["method"], "ethRpc");
        assert_eq!(message["params"]["method"], "eth_accounts");
        assert_eq!(message["params"]["jsonrpc"], "2.0");

        assert_eq!(envelope.reject_all(RpcError::ChannelClosed), 1);
        assert_eq!(call.await.unwrap(), Err(RpcError::ChannelClosed));
    }
}
