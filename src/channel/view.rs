// src/channel/view.rs
//! View half of the sandbox channel.
//!
//! Runs inside the sandboxed content. Talks to exactly one engine origin,
//! forwards host events to subscribers and tunnels Ethereum requests to the
//! host as `ethRpc` messages.

use crate::channel::collaborators::FormScope;
use crate::channel::lifecycle::{ChannelState, Lifecycle};
use crate::channel::messages::{
    ChannelMessage, Delivery, DropReason, MessageEvent, RequestFromView, ViewEvent,
};
use crate::channel::subscription::{Subscribers, Subscription};
use crate::error::{ChannelError, RpcError};
use crate::rpc::envelope::{RpcEnvelope, DEFAULT_RPC_TIMEOUT};
use crate::rpc::message::RpcId;
use crate::rpc::transport::MessageTarget;
use crate::utils::serialization::with_field;
use log::{debug, error, info};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub rpc_timeout: Duration,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }
}

/// Host events surfaced to view code.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewNotification {
    TokensUpdated {
        old_tokens: Value,
        updated_tokens: Value,
        card_id: Value,
    },
    Confirm,
    TransactionEvent(Value),
    /// The host closed the channel.
    Closed,
}

type Predicate = Arc<dyn Fn(&str, &Value) -> bool + Send + Sync>;

/// Decides which callback message completes a request.
#[derive(Clone)]
pub enum ResponseListener {
    /// The first message carrying the request id.
    First,
    /// The first message for which the predicate, given method and params, holds.
    Until(Predicate),
}

impl ResponseListener {
    pub fn until<F>(predicate: F) -> Self
    where
        F: Fn(&str, &Value) -> bool + Send + Sync + 'static,
    {
        ResponseListener::Until(Arc::new(predicate))
    }

    fn completes(&self, method: &str, params: &Value) -> bool {
        match self {
            ResponseListener::First => true,
            ResponseListener::Until(predicate) => predicate(method, params),
        }
    }
}

struct PendingRequest {
    listener: ResponseListener,
    completer: oneshot::Sender<Result<Value, ChannelError>>,
}

pub struct ViewChannel {
    host: Arc<dyn MessageTarget>,
    engine_origin: String,
    forms: Arc<dyn FormScope>,
    lifecycle: Lifecycle,
    envelope: RpcEnvelope,
    listeners: Mutex<HashMap<RpcId, PendingRequest>>,
    subscribers: Subscribers<ViewNotification>,
}

impl ViewChannel {
    pub fn new(
        host: Arc<dyn MessageTarget>,
        engine_origin: &str,
        forms: Arc<dyn FormScope>,
        settings: ViewSettings,
    ) -> Self {
        let envelope = RpcEnvelope::new(host.clone(), engine_origin)
            .wrapped_in(RequestFromView::EthRpc.as_str())
            .with_timeout(settings.rpc_timeout);
        Self {
            host,
            engine_origin: engine_origin.to_string(),
            forms,
            lifecycle: Lifecycle::new(),
            envelope,
            listeners: Mutex::new(HashMap::new()),
            subscribers: Subscribers::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.lifecycle.state()
    }

    /// The view content finished initializing.
    pub fn view_loaded(&self) {
        self.lifecycle.loaded();
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ViewNotification) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(handler)
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<RpcId, PendingRequest>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_requests(&self) -> usize {
        self.listeners().len() + self.envelope.pending_count()
    }

    /// Handles one inbound `message` event. Only the engine origin is accepted.
    pub fn handle_message(&self, event: MessageEvent) -> Delivery {
        if event.origin != self.engine_origin {
            debug!("Dropping message from unexpected origin {}", event.origin);
            return Delivery::Dropped(DropReason::Origin);
        }
        if let Err(reason) = self.lifecycle.admit() {
            debug!("Dropping message in state {}", self.lifecycle.state());
            return Delivery::Dropped(reason);
        }

        if event.data.get("jsonrpc").is_some() {
            return if self.envelope.handle_message(&event.data) {
                Delivery::Handled
            } else {
                Delivery::Dropped(DropReason::Unrecognized)
            };
        }

        let message = match ChannelMessage::from_value(&event.data) {
            Some(message) => message,
            None => return Delivery::Dropped(DropReason::Malformed),
        };

        if message.method == RequestFromView::Close.as_str() {
            info!("Host closed the channel");
            self.teardown();
            self.subscribers.emit(&ViewNotification::Closed);
            return Delivery::Handled;
        }

        let event = ViewEvent::parse(&message.method);
        match event {
            Some(ViewEvent::TokensUpdated) => {
                let params = &message.params;
                self.subscribers.emit(&ViewNotification::TokensUpdated {
                    old_tokens: params.get("oldTokens").cloned().unwrap_or(Value::Null),
                    updated_tokens: params.get("updatedTokens").cloned().unwrap_or(Value::Null),
                    card_id: params.get("cardId").cloned().unwrap_or(Value::Null),
                });
            }
            Some(ViewEvent::OnConfirm) => self.subscribers.emit(&ViewNotification::Confirm),
            Some(ViewEvent::GetUserInput) => {
                if let Err(e) = self.send_user_input_values() {
                    debug!("Could not send user input: {}", e);
                }
            }
            Some(ViewEvent::TransactionEvent) => self
                .subscribers
                .emit(&ViewNotification::TransactionEvent(message.params.clone())),
            Some(ViewEvent::ExecuteCallback) => {}
            None => debug!("Unknown event from host: {}", message.method),
        }

        let settled = self.settle_listener(&message);
        if event.is_some() || settled {
            Delivery::Handled
        } else {
            Delivery::Dropped(DropReason::Unrecognized)
        }
    }

    fn settle_listener(&self, message: &ChannelMessage) -> bool {
        let key = match message.callback_id() {
            Some(id) => id,
            None => return false,
        };
        let mut listeners = self.listeners();
        let completes = match listeners.get(&key) {
            Some(pending) => {
                has_error(&message.params) || pending.listener.completes(&message.method, &message.params)
            }
            None => return false,
        };
        if !completes {
            return true;
        }
        if let Some(pending) = listeners.remove(&key) {
            let outcome = match message.params.get("error") {
                Some(error) if has_error(&message.params) => {
                    error!("Error from engine: {}", error);
                    Err(ChannelError::Remote(error_text(error)))
                }
                _ => Ok(message.params.clone()),
            };
            let _ = pending.completer.send(outcome);
        }
        true
    }

    /// Posts `{ "method", "params" }` to the host without waiting for an answer.
    pub fn send(&self, method: RequestFromView, params: Value) -> Result<(), ChannelError> {
        self.lifecycle.admit_outbound()?;
        self.host
            .post_message(ChannelMessage::new(method.as_str(), params).to_value(), &self.engine_origin);
        Ok(())
    }

    /// Posts a request carrying a fresh id and waits until `listener` completes it.
    ///
    /// There is no deadline: a host that never answers leaves the request
    /// pending until the channel closes. Wrap the future in
    /// `tokio::time::timeout` where a bound is needed.
    ///
    /// # Errors
    /// - [`ChannelError::Remote`] when a callback for the id carries an error
    /// - [`ChannelError::Closed`] when the channel is torn down first
    pub async fn request(
        &self,
        method: RequestFromView,
        params: Value,
        listener: ResponseListener,
    ) -> Result<Value, ChannelError> {
        let id = RpcId::random();
        let (completer, receiver) = oneshot::channel();
        self.listeners().insert(id.clone(), PendingRequest { listener, completer });

        let params = with_field(&params, "id", json!(id));
        if let Err(e) = self.send(method, params) {
            self.listeners().remove(&id);
            return Err(e);
        }
        receiver.await.unwrap_or(Err(ChannelError::Closed))
    }

    /// Signs `data` with the host wallet.
    pub async fn sign_personal_message(&self, data: &str) -> Result<Value, ChannelError> {
        let response = self
            .request(
                RequestFromView::SignPersonalMessage,
                json!({ "data": data }),
                ResponseListener::First,
            )
            .await?;
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// An Ethereum JSON-RPC request answered by the host wallet or chain.
    ///
    /// # Arguments
    /// * `method` - Ethereum JSON-RPC method, such as `eth_chainId`
    /// * `params` - Optional request parameters
    ///
    /// # Errors
    /// - [`RpcError::ChannelClosed`] before load, after close, or when the
    ///   channel closes while the request is pending
    /// - [`RpcError::Timeout`] after the configured RPC timeout
    /// - [`RpcError::Remote`] for an error answer from the host
    pub async fn eth_request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.lifecycle.admit_outbound().map_err(|_| RpcError::ChannelClosed)?;
        self.envelope.call(method, params).await
    }

    /// Reports the values of reportable form inputs with `putUserInput`.
    ///
    /// Nothing is posted when there are none.
    pub fn send_user_input_values(&self) -> Result<(), ChannelError> {
        let values: Map<String, Value> = self
            .forms
            .inputs()
            .into_iter()
            .filter(|input| input.is_reported())
            .map(|input| (input.id, Value::String(input.value)))
            .collect();
        if values.is_empty() {
            return Ok(());
        }
        self.send(RequestFromView::PutUserInput, Value::Object(values))
    }

    /// Posts `close` to the host, then tears the channel down.
    pub fn close(&self) {
        if self.lifecycle.state() == ChannelState::Unloaded {
            return;
        }
        self.host
            .post_message(ChannelMessage::new(RequestFromView::Close.as_str(), Value::Null).to_value(), &self.engine_origin);
        self.teardown();
    }

    fn teardown(&self) {
        if !self.lifecycle.unload() {
            return;
        }
        let rejected = self.envelope.reject_all(RpcError::ChannelClosed);
        let pending: Vec<PendingRequest> = self.listeners().drain().map(|(_, p)| p).collect();
        let count = rejected + pending.len();
        for request in pending {
            let _ = request.completer.send(Err(ChannelError::Closed));
        }
        info!("View channel unloaded, rejected {} pending request(s)", count);
    }
}

fn has_error(params: &Value) -> bool {
    match params.get("error") {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
