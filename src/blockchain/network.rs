// src/blockchain/network.rs
//! Chain identity as reported by `eth_chainId`.

use crate::error::ProviderError;
use ethers_core::types::U256;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

static KNOWN_NETWORKS: Lazy<HashMap<u64, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (1, "mainnet"),
        (5, "goerli"),
        (10, "optimism"),
        (56, "bnb"),
        (100, "gnosis"),
        (137, "matic"),
        (324, "zksync"),
        (8453, "base"),
        (42161, "arbitrum"),
        (43114, "avalanche"),
        (80002, "matic-amoy"),
        (84532, "base-sepolia"),
        (11155111, "sepolia"),
    ])
});

/// Canonical chain identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub chain_id: u64,
    pub name: String,
}

impl Network {
    /// Names a chain id.
    ///
    /// # Arguments
    /// * `chain_id` - EIP-155 chain id
    ///
    /// # Returns
    /// The network with its well-known name, or `chain-<id>` for unknown chains.
    pub fn from_chain_id(chain_id: u64) -> Self {
        let name = KNOWN_NETWORKS
            .get(&chain_id)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("chain-{}", chain_id));
        Self { chain_id, name }
    }

    /// Normalizes a `chainId` result given as a hex string, decimal string or number.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        let invalid = || ProviderError::InvalidResponse(format!("invalid chain id {}", value));
        let chain_id = match value {
            Value::String(text) => {
                let text = text.trim();
                match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                    Some(hex) => U256::from_str_radix(hex, 16).map_err(|_| invalid())?,
                    None => U256::from_dec_str(text).map_err(|_| invalid())?,
                }
            }
            Value::Number(number) => U256::from(number.as_u64().ok_or_else(invalid)?),
            _ => return Err(invalid()),
        };
        if chain_id.is_zero() || chain_id > U256::from(u64::MAX) {
            return Err(invalid());
        }
        Ok(Self::from_chain_id(chain_id.as_u64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalizes_hex_decimal_and_number() {
        assert_eq!(Network::from_value(&json!("0x89")).unwrap().chain_id, 137);
        assert_eq!(Network::from_value(&json!("137")).unwrap().name, "matic");
        assert_eq!(Network::from_value(&json!(1)).unwrap().name, "mainnet");
    }

    #[test]
    fn test_unknown_chain_gets_generic_name() {
        assert_eq!(Network::from_chain_id(999).name, "chain-999");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Network::from_value(&json!("0xzz")).is_err());
        assert!(Network::from_value(&json!("abc")).is_err());
        assert!(Network::from_value(&json!(null)).is_err());
        assert!(Network::from_value(&json!("0x0")).is_err());
        assert!(Network::from_value(&json!(-1)).is_err());
    }
}
