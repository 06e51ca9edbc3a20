// src/channel/collaborators.rs
//! Capabilities the channel halves depend on, supplied by the embedder.

use crate::error::{SignerError, StorageError};
use async_trait::async_trait;
use ethers_core::types::Address;
use serde_json::Value;
use std::collections::HashMap;

/// The wallet answering signing and account requests from a view.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Signs `data` as a `personal_sign` message. Hex input (`0x..`) is signed
    /// as bytes, anything else as UTF-8 text.
    async fn sign_personal_message(&self, data: &str) -> Result<String, SignerError>;

    /// Signs and broadcasts a transaction. Returns its hash.
    async fn send_transaction(&self, transaction: &Value) -> Result<String, SignerError>;

    /// Signs a transaction without broadcasting it. Returns the raw signed bytes as hex.
    async fn sign_transaction(&self, _transaction: &Value) -> Result<String, SignerError> {
        Err(SignerError::Unsupported("eth_signTransaction".to_string()))
    }
}

/// Key/value storage scoped per TokenScript.
pub trait StorageBackend: Send + Sync {
    fn set_item(&self, ts_id: &str, key: &str, value: &str) -> Result<(), StorageError>;

    fn get_item(&self, ts_id: &str, key: &str) -> Result<Option<String>, StorageError>;

    fn get_all_items(&self, ts_id: &str) -> Result<HashMap<String, String>, StorageError>;

    fn remove_item(&self, ts_id: &str, key: &str) -> Result<(), StorageError>;

    fn clear(&self, ts_id: &str) -> Result<(), StorageError>;
}

/// One form control in a view document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormInput {
    pub id: String,
    pub value: String,
    /// The `data-ts-prop` attribute.
    pub ts_prop: Option<String>,
}

impl FormInput {
    pub fn new(id: &str, value: &str) -> Self {
        Self {
            id: id.to_string(),
            value: value.to_string(),
            ts_prop: None,
        }
    }

    pub fn with_ts_prop(mut self, ts_prop: &str) -> Self {
        self.ts_prop = Some(ts_prop.to_string());
        self
    }

    /// Whether the input contributes to user entry values.
    pub fn is_reported(&self) -> bool {
        !self.id.is_empty() && self.ts_prop.as_deref() != Some("false")
    }
}

/// The form inputs visible to a view.
pub trait FormScope: Send + Sync {
    fn inputs(&self) -> Vec<FormInput>;
}

impl FormScope for Vec<FormInput> {
    fn inputs(&self) -> Vec<FormInput> {
        self.clone()
    }
}

/// Approves transactions a view asks the wallet to send.
#[async_trait]
pub trait TransactionValidator: Send + Sync {
    /// Whether the wallet may transact with `to` on `chain_id`.
    async fn validate_contract_address(&self, chain_id: u64, to: Option<&str>) -> bool;
}

/// Allows transactions only to the listed contracts.
#[derive(Debug, Clone, Default)]
pub struct ContractAllowList {
    contracts: Vec<(u64, String)>,
}

impl ContractAllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, chain_id: u64, address: &str) -> Self {
        self.contracts.push((chain_id, address.to_lowercase()));
        self
    }
}

#[async_trait]
impl TransactionValidator for ContractAllowList {
    async fn validate_contract_address(&self, chain_id: u64, to: Option<&str>) -> bool {
        let to = match to {
            Some(to) => to.to_lowercase(),
            None => return false,
        };
        self.contracts
            .iter()
            .any(|(chain, address)| *chain == chain_id && *address == to)
    }
}
