// src/blockchain/provider.rs
//! Chain RPC backends used by the fallback dispatcher.
//!
//! A [`ProviderEndpoint`] performs one JSON-RPC action and classifies its
//! failures: transport problems are fallback eligible, reverts are not.

use crate::error::ProviderError;
use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// JSON-RPC code used by nodes for `execution reverted`.
pub const EXECUTION_REVERTED_CODE: i64 = 3;

/// A chain action, mapped onto a JSON-RPC method and parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum PerformRequest {
    ChainId,
    BlockNumber,
    GetBalance { address: String, block: String },
    GetTransactionCount { address: String, block: String },
    GetCode { address: String, block: String },
    Call { transaction: Value, block: String },
    BroadcastTransaction { signed_transaction: String },
    Raw { method: String, params: Value },
}

impl PerformRequest {
    /// Maps a JSON-RPC method and parameters to a typed request where one exists.
    pub fn from_rpc(method: &str, params: Value) -> Self {
        let arg = |index: usize| params.get(index).cloned();
        let text = |index: usize| arg(index).and_then(|v| v.as_str().map(str::to_string));
        let block = |index: usize| text(index).unwrap_or_else(|| "latest".to_string());

        match (method, text(0)) {
            ("eth_chainId", _) => PerformRequest::ChainId,
            ("eth_blockNumber", _) => PerformRequest::BlockNumber,
            ("eth_getBalance", Some(address)) => PerformRequest::GetBalance {
                address,
                block: block(1),
            },
            ("eth_getTransactionCount", Some(address)) => PerformRequest::GetTransactionCount {
                address,
                block: block(1),
            },
            ("eth_getCode", Some(address)) => PerformRequest::GetCode {
                address,
                block: block(1),
            },
            ("eth_sendRawTransaction", Some(signed_transaction)) => {
                PerformRequest::BroadcastTransaction { signed_transaction }
            }
            ("eth_call", _) if arg(0).map_or(false, |tx| tx.is_object()) => PerformRequest::Call {
                transaction: arg(0).unwrap_or(Value::Null),
                block: block(1),
            },
            _ => PerformRequest::Raw {
                method: method.to_string(),
                params,
            },
        }
    }

    pub fn method(&self) -> &str {
        match self {
            PerformRequest::ChainId => "eth_chainId",
            PerformRequest::BlockNumber => "eth_blockNumber",
            PerformRequest::GetBalance { .. } => "eth_getBalance",
            PerformRequest::GetTransactionCount { .. } => "eth_getTransactionCount",
            PerformRequest::GetCode { .. } => "eth_getCode",
            PerformRequest::Call { .. } => "eth_call",
            PerformRequest::BroadcastTransaction { .. } => "eth_sendRawTransaction",
            PerformRequest::Raw { method, .. } => method,
        }
    }

    pub fn params(&self) -> Value {
        match self {
            PerformRequest::ChainId | PerformRequest::BlockNumber => json!([]),
            PerformRequest::GetBalance { address, block }
            | PerformRequest::GetTransactionCount { address, block }
            | PerformRequest::GetCode { address, block } => json!([address, block]),
            PerformRequest::Call { transaction, block } => json!([transaction, block]),
            PerformRequest::BroadcastTransaction { signed_transaction } => {
                json!([signed_transaction])
            }
            PerformRequest::Raw { params, .. } => match params {
                Value::Null => json!([]),
                other => other.clone(),
            },
        }
    }
}

/// One backend able to perform chain RPC actions.
#[async_trait]
pub trait ProviderEndpoint: Send + Sync {
    /// Name used in logs and teardown reports.
    fn name(&self) -> &str;

    async fn perform(&self, request: &PerformRequest) -> Result<Value, ProviderError>;

    /// Releases connections held by this endpoint.
    async fn destroy(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Classifies a JSON-RPC `error` object.
pub fn classify_rpc_error(error: &Value) -> ProviderError {
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    if code == EXECUTION_REVERTED_CODE || message.contains("execution reverted") {
        ProviderError::CallException {
            message,
            data: error.get("data").cloned(),
        }
    } else {
        ProviderError::Rpc { code, message }
    }
}

/// JSON-RPC over HTTP.
pub struct HttpProvider {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
    destroyed: AtomicBool,
}

impl HttpProvider {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Connectivity(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
            next_id: AtomicU64::new(1),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Endpoint this provider posts to.
    ///
    /// # Returns
    /// The URL exactly as configured. It also names the provider in logs.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ProviderEndpoint for HttpProvider {
    fn name(&self) -> &str {
        self.url()
    }

    async fn perform(&self, request: &PerformRequest) -> Result<Value, ProviderError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ProviderError::Connectivity(format!("{} is destroyed", self.url)));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": request.method(),
            "params": request.params(),
        });
        debug!("POST {} {}", self.url, request.method());

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Connectivity(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Connectivity(format!(
                "{} responded with HTTP {}",
                self.url, status
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        if let Some(error) = payload.get("error") {
            return Err(classify_rpc_error(error));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| ProviderError::InvalidResponse("missing result".to_string()))
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{mock, server_url, Matcher};

    fn provider(path: &str) -> HttpProvider {
        HttpProvider::new(&format!("{}{}", server_url(), path), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_from_rpc_maps_known_methods() {
        assert_eq!(PerformRequest::from_rpc("eth_chainId", json!([])), PerformRequest::ChainId);
        assert_eq!(
            PerformRequest::from_rpc("eth_getBalance", json!(["0xabc"])),
            PerformRequest::GetBalance {
                address: "0xabc".into(),
                block: "latest".into()
            }
        );
        let raw = PerformRequest::from_rpc("eth_getLogs", json!([{"address": "0x1"}]));
        assert_eq!(raw.method(), "eth_getLogs");
        assert_eq!(raw.params(), json!([{"address": "0x1"}]));
    }

    #[test]
    fn test_classify_revert_vs_rpc_error() {
        assert!(matches!(
            classify_rpc_error(&json!({"code": 3, "message": "execution reverted", "data": "0x08c379a0"})),
            ProviderError::CallException { .. }
        ));
        let err = classify_rpc_error(&json!({"code": -32005, "message": "limit exceeded"}));
        assert!(err.is_fallback_eligible());
    }

    #[tokio::test]
    async fn test_http_provider_returns_result() {
        let _m = mock("POST", "/rpc-ok")
            .match_body(Matcher::PartialJson(json!({"method": "eth_chainId"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#)
            .create();

        let value = provider("/rpc-ok").perform(&PerformRequest::ChainId).await.unwrap();
        assert_eq!(value, json!("0x1"));
    }

    #[tokio::test]
    async fn test_http_provider_revert_is_call_exception() {
        let _m = mock("POST", "/rpc-revert")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted"}}"#)
            .create();

        let err = provider("/rpc-revert")
            .perform(&PerformRequest::Call {
                transaction: json!({"to": "0x0000000000000000000000000000000000000001"}),
                block: "latest".into(),
            })
            .await
            .unwrap_err();
        assert!(!err.is_fallback_eligible());
    }

    #[tokio::test]
    async fn test_http_failure_is_connectivity() {
        let _m = mock("POST", "/rpc-down").with_status(503).create();
        let err = provider("/rpc-down").perform(&PerformRequest::BlockNumber).await.unwrap_err();
        assert!(matches!(err, ProviderError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_destroyed_provider_refuses_requests() {
        let provider = provider("/rpc-destroyed");
        provider.destroy().await.unwrap();
        assert!(matches!(
            provider.perform(&PerformRequest::ChainId).await,
            Err(ProviderError::Connectivity(_))
        ));
    }
}
