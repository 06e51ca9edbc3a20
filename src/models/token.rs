// src/models/token.rs
//! Token context pushed to a view with `tokensUpdated`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A fungible token balance as shown on a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FungibleToken {
    pub chain_id: u64,
    pub contract_address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Raw balance as a decimal string.
    pub balance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,
}

/// A single non-fungible token with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonFungibleTokenDetail {
    pub chain_id: u64,
    pub contract_address: String,
    pub token_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// The token a card is rendered for, discriminated by an explicit `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TokenContext {
    Fungible(FungibleToken),
    NonFungible(NonFungibleTokenDetail),
}

impl TokenContext {
    pub fn chain_id(&self) -> u64 {
        match self {
            TokenContext::Fungible(token) => token.chain_id,
            TokenContext::NonFungible(token) => token.chain_id,
        }
    }

    pub fn contract_address(&self) -> &str {
        match self {
            TokenContext::Fungible(token) => &token.contract_address,
            TokenContext::NonFungible(token) => &token.contract_address,
        }
    }

    pub fn token_id(&self) -> Option<&str> {
        match self {
            TokenContext::Fungible(_) => None,
            TokenContext::NonFungible(token) => Some(&token.token_id),
        }
    }
}
