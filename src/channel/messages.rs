// src/channel/messages.rs
//! Wire vocabulary of the host/view channel.
//!
//! Every non-RPC message is an envelope `{ "method", "params" }`. JSON-RPC
//! traffic (`ethRpc` requests and raw responses) travels on the same channel.

use crate::rpc::message::RpcId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identity of a browsing context (window, iframe) as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// An inbound `message` event.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub origin: String,
    pub source: Option<ContextId>,
    pub data: Value,
}

impl MessageEvent {
    pub fn new(origin: &str, source: Option<ContextId>, data: Value) -> Self {
        Self {
            origin: origin.to_string(),
            source,
            data,
        }
    }
}

/// Who a channel accepts messages from. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedSource {
    Origin(String),
    Context(ContextId),
}

impl ExpectedSource {
    pub fn matches(&self, event: &MessageEvent) -> bool {
        match self {
            ExpectedSource::Origin(origin) => event.origin == *origin,
            ExpectedSource::Context(context) => event.source == Some(*context),
        }
    }
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Handled,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Wrong origin or source context.
    Origin,
    /// The channel has not been loaded yet.
    NotReady,
    /// The channel is unloaded.
    Closed,
    Malformed,
    /// A well-formed message nobody handles, such as a stale RPC response.
    Unrecognized,
}

/// Events the host sends to the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ViewEvent {
    TokensUpdated,
    GetUserInput,
    ExecuteCallback,
    OnConfirm,
    TransactionEvent,
}

impl ViewEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewEvent::TokensUpdated => "tokensUpdated",
            ViewEvent::GetUserInput => "getUserInput",
            ViewEvent::ExecuteCallback => "executeCallback",
            ViewEvent::OnConfirm => "onConfirm",
            ViewEvent::TransactionEvent => "transactionEvent",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        [
            ViewEvent::TokensUpdated,
            ViewEvent::GetUserInput,
            ViewEvent::ExecuteCallback,
            ViewEvent::OnConfirm,
            ViewEvent::TransactionEvent,
        ]
        .into_iter()
        .find(|event| event.as_str() == method)
    }
}

/// Requests the view sends to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestFromView {
    SignPersonalMessage,
    PutUserInput,
    Close,
    OpenCard,
    EthRpc,
    LocalStorage,
    SetLoader,
    SetButton,
    ExecTransaction,
    ShowTransactionToast,
    ShowToast,
}

impl RequestFromView {
    const ALL: [RequestFromView; 11] = [
        RequestFromView::SignPersonalMessage,
        RequestFromView::PutUserInput,
        RequestFromView::Close,
        RequestFromView::OpenCard,
        RequestFromView::EthRpc,
        RequestFromView::LocalStorage,
        RequestFromView::SetLoader,
        RequestFromView::SetButton,
        RequestFromView::ExecTransaction,
        RequestFromView::ShowTransactionToast,
        RequestFromView::ShowToast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestFromView::SignPersonalMessage => "signPersonalMessage",
            RequestFromView::PutUserInput => "putUserInput",
            RequestFromView::Close => "close",
            RequestFromView::OpenCard => "openCard",
            RequestFromView::EthRpc => "ethRpc",
            RequestFromView::LocalStorage => "localStorage",
            RequestFromView::SetLoader => "setLoader",
            RequestFromView::SetButton => "setButton",
            RequestFromView::ExecTransaction => "execTransaction",
            RequestFromView::ShowTransactionToast => "showTransactionToast",
            RequestFromView::ShowToast => "showToast",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|request| request.as_str() == method)
    }

    /// Requests only the embedding UI acts on.
    pub fn is_ui_only(&self) -> bool {
        matches!(
            self,
            RequestFromView::OpenCard
                | RequestFromView::ExecTransaction
                | RequestFromView::SetLoader
                | RequestFromView::SetButton
                | RequestFromView::ShowToast
                | RequestFromView::ShowTransactionToast
        )
    }
}

impl fmt::Display for RequestFromView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `{ "method", "params" }` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl ChannelMessage {
    pub fn new(method: &str, params: Value) -> Self {
        Self {
            method: method.to_string(),
            params,
        }
    }

    /// Parses a channel envelope. JSON-RPC messages are not envelopes.
    pub fn from_value(data: &Value) -> Option<Self> {
        if data.get("jsonrpc").is_some() {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }

    /// The callback id carried in `params.id`, if any.
    pub fn callback_id(&self) -> Option<RpcId> {
        self.params.get("id").and_then(RpcId::from_value)
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("method".to_string(), Value::String(self.method.clone()));
        object.insert("params".to_string(), self.params.clone());
        Value::Object(object)
    }
}

/// Scoped key/value storage request from the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum LocalStorageRequest {
    Set { key: String, value: String },
    Remove { key: String },
    Clear,
    Get {
        key: String,
        #[serde(default)]
        id: Option<RpcId>,
    },
    GetAll {
        #[serde(default)]
        id: Option<RpcId>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_names_round_trip() {
        assert_eq!(ViewEvent::parse("tokensUpdated"), Some(ViewEvent::TokensUpdated));
        assert_eq!(ViewEvent::parse("executeCallback").unwrap().as_str(), "executeCallback");
        assert_eq!(RequestFromView::parse("ethRpc"), Some(RequestFromView::EthRpc));
        assert_eq!(RequestFromView::parse("nope"), None);
        assert_eq!(
            serde_json::to_value(RequestFromView::ShowTransactionToast).unwrap(),
            json!("showTransactionToast")
        );
    }

    #[test]
    fn test_channel_message_excludes_rpc() {
        let rpc = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"});
        assert!(ChannelMessage::from_value(&rpc).is_none());

        let message = ChannelMessage::from_value(&json!({"method": "close"})).unwrap();
        assert_eq!(message.method, "close");
        assert_eq!(message.params, Value::Null);

        let callback = ChannelMessage::from_value(&json!({"method": "executeCallback", "params": {"id": 9}})).unwrap();
        assert_eq!(callback.callback_id(), Some(RpcId::Number(9)));
    }

    #[test]
    fn test_local_storage_requests() {
        let set: LocalStorageRequest =
            serde_json::from_value(json!({"method": "set", "key": "k", "value": "v"})).unwrap();
        assert_eq!(set, LocalStorageRequest::Set { key: "k".into(), value: "v".into() });

        let all: LocalStorageRequest = serde_json::from_value(json!({"method": "getAll", "id": 3})).unwrap();
        assert_eq!(all, LocalStorageRequest::GetAll { id: Some(RpcId::Number(3)) });
    }

    #[test]
    fn test_expected_source() {
        let event = MessageEvent::new("https://view.example", Some(ContextId(4)), json!({}));
        assert!(ExpectedSource::Context(ContextId(4)).matches(&event));
        assert!(!ExpectedSource::Context(ContextId(5)).matches(&event));
        assert!(ExpectedSource::Origin("https://view.example".into()).matches(&event));
        assert!(!ExpectedSource::Origin("https://evil.example".into()).matches(&event));
    }
}
