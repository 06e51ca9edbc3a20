// src/channel/host.rs
//! Host half of the sandbox channel.
//!
//! Receives requests from a sandboxed view, routes them to the wallet,
//! storage and chain collaborators, and posts events back to the view.

use crate::blockchain::fallback::FallbackDispatcher;
use crate::blockchain::provider::PerformRequest;
use crate::channel::collaborators::{StorageBackend, TransactionValidator, WalletSigner};
use crate::channel::lifecycle::{ChannelState, Lifecycle};
use crate::channel::messages::{
    ChannelMessage, Delivery, DropReason, ExpectedSource, LocalStorageRequest, MessageEvent,
    RequestFromView, ViewEvent,
};
use crate::channel::subscription::{Subscribers, Subscription};
use crate::error::{ChannelError, SignerError, StorageError};
use crate::models::token::TokenContext;
use crate::rpc::message::{RpcId, RpcRequest, RpcResponse};
use crate::rpc::transport::MessageTarget;
use crate::utils::crypto::checksum_address;
use crate::utils::serialization::{to_message_value, with_field};
use log::{debug, info, warn};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Scope of user entry values when no token is selected.
pub const DEFAULT_SCOPE: &str = "-1";

/// JSON-RPC code for a request the user or wallet refused.
pub const USER_REJECTED_CODE: i64 = 4001;
/// JSON-RPC code for a method the wallet does not support.
pub const UNSUPPORTED_METHOD_CODE: i64 = 4200;
pub const INVALID_PARAMS_CODE: i64 = -32602;
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// Services a host exposes to the views it embeds.
#[derive(Clone)]
pub struct HostContext {
    pub signer: Arc<dyn WalletSigner>,
    pub storage: Option<Arc<dyn StorageBackend>>,
    pub dispatcher: Arc<FallbackDispatcher>,
    pub validator: Arc<dyn TransactionValidator>,
    /// Storage scope of the TokenScript being shown.
    pub ts_id: String,
}

/// What a host channel reports to its embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A UI-only request such as `openCard` or `showToast`.
    Ui {
        method: RequestFromView,
        params: Value,
    },
    /// User entry values changed in the current scope.
    UserInputChanged { keys: Vec<String> },
    /// The view asked to be closed.
    Closed,
}

pub struct HostChannel {
    view: Arc<dyn MessageTarget>,
    expected_source: ExpectedSource,
    target_origin: String,
    context: HostContext,
    lifecycle: Lifecycle,
    scope: Mutex<String>,
    user_entry_values: Mutex<HashMap<String, Map<String, Value>>>,
    subscribers: Subscribers<HostEvent>,
}

impl HostChannel {
    /// Creates a channel to one sandboxed view.
    ///
    /// # Arguments
    /// * `view` - Target the view's messages are posted to
    /// * `expected_source` - The only origin or context accepted as sender
    /// * `target_origin` - Origin restriction for outbound posts
    /// * `context` - Wallet, storage, chain and validation services
    pub fn new(
        view: Arc<dyn MessageTarget>,
        expected_source: ExpectedSource,
        target_origin: &str,
        context: HostContext,
    ) -> Self {
        Self {
            view,
            expected_source,
            target_origin: target_origin.to_string(),
            context,
            lifecycle: Lifecycle::new(),
            scope: Mutex::new(DEFAULT_SCOPE.to_string()),
            user_entry_values: Mutex::new(HashMap::new()),
            subscribers: Subscribers::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.lifecycle.state()
    }

    /// The view finished loading.
    pub fn view_loaded(&self) {
        self.lifecycle.loaded();
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    /// Selects the token whose user entry values subsequent input belongs to.
    pub fn set_token_context(&self, token: Option<&TokenContext>) {
        let scope = token
            .and_then(TokenContext::token_id)
            .unwrap_or(DEFAULT_SCOPE)
            .to_string();
        *lock(&self.scope) = scope;
    }

    /// A user entry value of the current scope. Empty values read as absent.
    pub fn user_entry_value(&self, key: &str) -> Option<Value> {
        let scope = lock(&self.scope).clone();
        lock(&self.user_entry_values)
            .get(&scope)
            .and_then(|values| values.get(key))
            .filter(|value| is_truthy(value))
            .cloned()
    }

    /// Handles one inbound `message` event.
    pub async fn handle_message(&self, event: MessageEvent) -> Delivery {
        if !self.expected_source.matches(&event) {
            debug!("Dropping message from unexpected source {}", event.origin);
            return Delivery::Dropped(DropReason::Origin);
        }
        if let Err(reason) = self.lifecycle.admit() {
            debug!("Dropping message in state {}", self.lifecycle.state());
            return Delivery::Dropped(reason);
        }

        let message = match ChannelMessage::from_value(&event.data) {
            Some(message) => message,
            None => {
                warn!("Dropping malformed message from view");
                return Delivery::Dropped(DropReason::Malformed);
            }
        };
        let method = match RequestFromView::parse(&message.method) {
            Some(method) => method,
            None => {
                warn!("Unknown request from view: {}", message.method);
                return Delivery::Dropped(DropReason::Unrecognized);
            }
        };

        match self.dispatch(method, message.params).await {
            Ok(()) => Delivery::Handled,
            Err(e) => {
                warn!("Failed to handle {} from view: {}", method, e);
                Delivery::Dropped(DropReason::Malformed)
            }
        }
    }

    async fn dispatch(&self, method: RequestFromView, params: Value) -> Result<(), ChannelError> {
        match method {
            RequestFromView::SignPersonalMessage => self.sign_personal_message(&params).await,
            RequestFromView::LocalStorage => self.local_storage(params),
            RequestFromView::PutUserInput => {
                self.set_user_entry_values(&params);
                Ok(())
            }
            RequestFromView::Close => {
                info!("View requested close");
                self.unload();
                self.subscribers.emit(&HostEvent::Closed);
                Ok(())
            }
            RequestFromView::EthRpc => self.rpc_proxy(params).await,
            ui if ui.is_ui_only() => {
                self.subscribers.emit(&HostEvent::Ui { method: ui, params });
                Ok(())
            }
            other => Err(ChannelError::Malformed(format!("{} has no host handler", other))),
        }
    }

    /// Posts `{ "method": event, "params": data + id }` to the view.
    ///
    /// `tokensUpdated` data is wrapped as `{ oldTokens, updatedTokens, cardId, id }`.
    pub fn send(&self, event: ViewEvent, data: Value, id: Option<Value>) -> Result<(), ChannelError> {
        let id = id.unwrap_or(Value::Null);
        let params = match event {
            ViewEvent::TokensUpdated => {
                let tokens = json!({ "currentInstance": data });
                json!({
                    "oldTokens": tokens,
                    "updatedTokens": tokens,
                    "cardId": id,
                    "id": id,
                })
            }
            _ => with_field(&data, "id", id),
        };
        self.post(ChannelMessage::new(event.as_str(), params).to_value())
    }

    /// Sends `tokensUpdated` for `token` with its resolved attribute values.
    pub fn tokens_updated(
        &self,
        token: &TokenContext,
        attributes: &Map<String, Value>,
    ) -> Result<(), ChannelError> {
        let mut data = match serde_json::to_value(token) {
            Ok(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        data.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        let card_id = format!("token-card-{}", token.token_id().unwrap_or(""));
        self.send(ViewEvent::TokensUpdated, Value::Object(data), Some(json!(card_id)))
    }

    /// Asks the view to report its form values.
    pub fn request_user_input(&self) -> Result<(), ChannelError> {
        self.send(ViewEvent::GetUserInput, json!({}), None)
    }

    /// Tells the view the user confirmed the card action.
    pub fn confirm(&self) -> Result<(), ChannelError> {
        self.send(ViewEvent::OnConfirm, json!({}), None)
    }

    pub fn transaction_event(&self, status: Value, id: Option<Value>) -> Result<(), ChannelError> {
        self.send(ViewEvent::TransactionEvent, status, id)
    }

    /// Posts a raw JSON-RPC response.
    pub fn dispatch_rpc_result(&self, response: &RpcResponse) -> Result<(), ChannelError> {
        self.post(to_message_value(response)?)
    }

    /// Sends the final `close` notification and unloads.
    pub fn close(&self) {
        if self.lifecycle.state() == ChannelState::Unloaded {
            return;
        }
        self.view
            .post_message(ChannelMessage::new("close", json!({})).to_value(), &self.target_origin);
        self.unload();
    }

    fn unload(&self) {
        if self.lifecycle.unload() {
            info!("Host channel unloaded");
        }
    }

    fn post(&self, message: Value) -> Result<(), ChannelError> {
        self.lifecycle.admit_outbound()?;
        self.view.post_message(message, &self.target_origin);
        Ok(())
    }

    fn execute_callback(&self, id: &Value, outcome: Result<Value, String>) -> Result<(), ChannelError> {
        let data = match outcome {
            Ok(result) => json!({ "error": null, "result": result }),
            Err(error) => json!({ "error": error, "result": null }),
        };
        self.send(ViewEvent::ExecuteCallback, data, Some(id.clone()))
    }

    async fn sign_personal_message(&self, params: &Value) -> Result<(), ChannelError> {
        let id = params.get("id").cloned().unwrap_or(Value::Null);
        let data = params
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Malformed("signPersonalMessage without data".into()))?;

        let outcome = self
            .context
            .signer
            .sign_personal_message(data)
            .await
            .map(Value::String)
            .map_err(|e| e.to_string());
        self.execute_callback(&id, outcome)
    }

    fn local_storage(&self, params: Value) -> Result<(), ChannelError> {
        let request: LocalStorageRequest =
            serde_json::from_value(params).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        let storage = match &self.context.storage {
            Some(storage) => storage,
            None => {
                warn!("localStorage request without a storage backend");
                return Ok(());
            }
        };
        let ts_id = self.context.ts_id.as_str();
        let failed = |e: StorageError| e.to_string();

        match request {
            LocalStorageRequest::Set { key, value } => {
                log_storage_error(storage.set_item(ts_id, &key, &value));
                Ok(())
            }
            LocalStorageRequest::Remove { key } => {
                log_storage_error(storage.remove_item(ts_id, &key));
                Ok(())
            }
            LocalStorageRequest::Clear => {
                log_storage_error(storage.clear(ts_id));
                Ok(())
            }
            LocalStorageRequest::Get { key, id } => {
                let outcome = storage
                    .get_item(ts_id, &key)
                    .map(|value| value.map(Value::String).unwrap_or(Value::Null))
                    .map_err(failed);
                self.execute_callback(&callback_id(id), outcome)
            }
            LocalStorageRequest::GetAll { id } => {
                let outcome = storage
                    .get_all_items(ts_id)
                    .map(|items| {
                        Value::Object(items.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
                    })
                    .map_err(failed);
                self.execute_callback(&callback_id(id), outcome)
            }
        }
    }

    /// Stores changed user entry values of the current scope.
    ///
    /// Unchanged values and empty values for unset keys are skipped.
    fn set_user_entry_values(&self, params: &Value) {
        let entries = match params.as_object() {
            Some(entries) => entries,
            None => return,
        };
        let scope = lock(&self.scope).clone();
        let mut changed = Vec::new();
        {
            let mut all = lock(&self.user_entry_values);
            let values = all.entry(scope).or_default();
            for (key, value) in entries {
                let current = values.get(key).filter(|current| is_truthy(current));
                match current {
                    Some(current) if current == value => continue,
                    None if value == "" => continue,
                    _ => {}
                }
                debug!("User input '{}' changed to {}", key, value);
                values.insert(key.clone(), value.clone());
                changed.push(key.clone());
            }
        }
        if !changed.is_empty() {
            self.subscribers.emit(&HostEvent::UserInputChanged { keys: changed });
        }
    }

    async fn rpc_proxy(&self, params: Value) -> Result<(), ChannelError> {
        let request: RpcRequest =
            serde_json::from_value(params).map_err(|e| ChannelError::Malformed(e.to_string()))?;
        let id = request.id.clone();
        let response = match self.answer_rpc(&request).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(RpcFailure { code, message, data }) => {
                debug!("RPC {} failed: {}", request.method, message);
                RpcResponse::failure(id, code, message, data)
            }
        };
        self.dispatch_rpc_result(&response)
    }

    async fn answer_rpc(&self, request: &RpcRequest) -> Result<Value, RpcFailure> {
        let params = request.params.clone().unwrap_or_else(|| json!([]));
        let signer = &self.context.signer;

        match request.method.as_str() {
            "eth_accounts" | "eth_requestAccounts" => {
                Ok(json!([checksum_address(&signer.address())]))
            }
            "personal_sign" => {
                let data = params
                    .get(0)
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcFailure::invalid_params("personal_sign expects [data, address]"))?;
                Ok(Value::String(signer.sign_personal_message(data).await?))
            }
            "eth_sendTransaction" | "eth_signTransaction" => {
                let transaction = params
                    .get(0)
                    .filter(|tx| tx.is_object())
                    .ok_or_else(|| RpcFailure::invalid_params("expected a transaction object"))?;
                let chain_id = self
                    .context
                    .dispatcher
                    .detect_network()
                    .await
                    .map_err(RpcFailure::from_provider)?
                    .chain_id;
                let to = transaction.get("to").and_then(Value::as_str);
                if !self.context.validator.validate_contract_address(chain_id, to).await {
                    warn!("Rejected transaction to {:?} on chain {}", to, chain_id);
                    return Err(RpcFailure {
                        code: USER_REJECTED_CODE,
                        message: "transaction target is not a contract of this TokenScript".into(),
                        data: None,
                    });
                }
                let result = if request.method == "eth_sendTransaction" {
                    signer.send_transaction(transaction).await?
                } else {
                    signer.sign_transaction(transaction).await?
                };
                Ok(Value::String(result))
            }
            method => self
                .context
                .dispatcher
                .perform(&PerformRequest::from_rpc(method, params))
                .await
                .map_err(RpcFailure::from_provider),
        }
    }
}

/// Error relayed to the view as a JSON-RPC error object.
struct RpcFailure {
    code: i64,
    message: String,
    data: Option<Value>,
}

impl RpcFailure {
    fn invalid_params(message: &str) -> Self {
        Self {
            code: INVALID_PARAMS_CODE,
            message: message.to_string(),
            data: None,
        }
    }

    fn from_provider(error: crate::error::ProviderError) -> Self {
        let data = match &error {
            crate::error::ProviderError::CallException { data, .. } => data.clone(),
            _ => None,
        };
        Self {
            code: error.rpc_code(),
            message: error.to_string(),
            data,
        }
    }
}

impl From<SignerError> for RpcFailure {
    fn from(error: SignerError) -> Self {
        let code = match error {
            SignerError::Rejected => USER_REJECTED_CODE,
            SignerError::Unsupported(_) => UNSUPPORTED_METHOD_CODE,
            SignerError::InvalidData(_) => INVALID_PARAMS_CODE,
            SignerError::Signing(_) => INTERNAL_ERROR_CODE,
        };
        Self {
            code,
            message: error.to_string(),
            data: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn callback_id(id: Option<RpcId>) -> Value {
    match id {
        Some(RpcId::Number(n)) => json!(n),
        Some(RpcId::String(s)) => Value::String(s),
        None => Value::Null,
    }
}

fn log_storage_error(result: Result<(), StorageError>) {
    if let Err(e) = result {
        warn!("localStorage update failed: {}", e);
    }
}

/// JavaScript truthiness of a stored entry value.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
