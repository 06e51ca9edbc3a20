// src/wallet/key_management.rs
//! Local key management for the wallet collaborator.
//!
//! Provides a [`WalletSigner`] backed by an in-process secp256k1 key for:
//! - `personal_sign` (EIP-191) message signatures
//! - Legacy transaction signing
//! - Broadcasting through the fallback dispatcher
//!
//! Uses the following cryptographic primitives:
//! - secp256k1 curve (via `k256` crate)
//! - Keccak-256 hashing (via `ethers` crate)
//! - Cryptographically secure random number generation

use crate::blockchain::fallback::FallbackDispatcher;
use crate::blockchain::provider::PerformRequest;
use crate::channel::collaborators::WalletSigner;
use crate::error::{ProviderError, SignerError};
use crate::utils::crypto::{eth_address, hash_personal_message};
use crate::utils::encoding::{from_hex, to_hex_prefixed};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Address, TransactionRequest, U256};
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use log::{debug, info};
use serde_json::{json, Value};
use std::sync::Arc;

/// Key management for an Ethereum account.
///
/// # Security Notes
/// - The secret key is never exposed
/// - Signatures are deterministic (RFC 6979) with low-S normalization
#[derive(Clone)]
pub struct KeyManager {
    /// Securely stored private key (never exposed)
    secret_key: SecretKey,
    /// Derived public key for verification
    pub public_key: PublicKey,
    /// Chain access used to fill and broadcast transactions
    dispatcher: Option<Arc<FallbackDispatcher>>,
}

impl KeyManager {
    /// Generates a new KeyManager with a fresh random key.
    pub fn new() -> Self {
        Self::from_secret_key(SecretKey::random(&mut rand::thread_rng()))
    }

    /// Loads a key from its 32-byte hex form (with or without `0x`).
    ///
    /// # Errors
    /// [`SignerError::InvalidData`] if the input is not a valid secp256k1 scalar
    pub fn from_hex_key(private_key: &str) -> Result<Self, SignerError> {
        let bytes = from_hex(private_key.trim()).map_err(SignerError::InvalidData)?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|_| SignerError::InvalidData("invalid secp256k1 private key".to_string()))?;
        Ok(Self::from_secret_key(secret_key))
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self {
            secret_key,
            public_key,
            dispatcher: None,
        }
    }

    /// Deterministic key for tests: every byte of the scalar is `seed`.
    #[cfg(test)]
    pub(crate) fn from_seed(seed: u8) -> Self {
        Self::from_secret_key(SecretKey::from_slice(&[seed; 32]).unwrap())
    }

    /// Lets the wallet fill and broadcast transactions through `dispatcher`.
    pub fn with_dispatcher(mut self, dispatcher: Arc<FallbackDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.secret_key)
    }

    /// Signs a message the way `personal_sign` does.
    ///
    /// # Arguments
    /// * `message` - Raw message bytes to sign
    ///
    /// # Returns
    /// 65-byte signature `r || s || v` with `v` in `{27, 28}`
    ///
    /// # Process Flow
    /// 1. Hashes the EIP-191 prefixed message with Keccak-256
    /// 2. Signs the hash with recoverable ECDSA
    pub fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        let hash = hash_personal_message(message);
        let (signature, recovery_id) = self
            .signing_key()
            .sign_prehash_recoverable(&hash)
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let mut bytes = signature.to_vec();
        bytes.push(27 + recovery_id.to_byte());
        Ok(bytes)
    }

    /// Completes chain id, nonce, gas price and gas limit from the chain.
    async fn fill_transaction(&self, transaction: &Value) -> Result<TypedTransaction, SignerError> {
        let mut request: TransactionRequest = serde_json::from_value(transaction.clone())
            .map_err(|e| SignerError::InvalidData(e.to_string()))?;
        request.from = Some(self.address());

        let complete = request.chain_id.is_some()
            && request.nonce.is_some()
            && request.gas.is_some()
            && request.gas_price.is_some();
        if complete {
            return Ok(TypedTransaction::Legacy(request));
        }

        let dispatcher = self.dispatcher.as_ref().ok_or_else(|| {
            SignerError::Unsupported("filling transactions needs a chain provider".to_string())
        })?;

        if request.chain_id.is_none() {
            let network = dispatcher.detect_network().await.map_err(chain_error)?;
            request.chain_id = Some(network.chain_id.into());
        }
        if request.nonce.is_none() {
            let count = dispatcher
                .perform(&PerformRequest::GetTransactionCount {
                    address: format!("{:?}", self.address()),
                    block: "pending".to_string(),
                })
                .await
                .map_err(chain_error)?;
            request.nonce = Some(quantity(count)?);
        }
        if request.gas_price.is_none() {
            let price = dispatcher
                .perform(&PerformRequest::Raw {
                    method: "eth_gasPrice".to_string(),
                    params: json!([]),
                })
                .await
                .map_err(chain_error)?;
            request.gas_price = Some(quantity(price)?);
        }
        if request.gas.is_none() {
            let estimate = dispatcher
                .perform(&PerformRequest::Raw {
                    method: "eth_estimateGas".to_string(),
                    params: json!([request]),
                })
                .await
                .map_err(chain_error)?;
            request.gas = Some(quantity(estimate)?);
        }

        Ok(TypedTransaction::Legacy(request))
    }

    async fn signed_transaction(&self, transaction: &Value) -> Result<Vec<u8>, SignerError> {
        let tx = self.fill_transaction(transaction).await?;
        let chain_id = tx.chain_id().map(|id| id.as_u64()).unwrap_or(1);
        let wallet = LocalWallet::from(self.signing_key()).with_chain_id(chain_id);
        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| SignerError::Signing(e.to_string()))?;
        Ok(tx.rlp_signed(&signature).to_vec())
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletSigner for KeyManager {
    fn address(&self) -> Address {
        let point = self.public_key.to_encoded_point(false);
        // An uncompressed point always yields an address.
        eth_address(point.as_bytes()).unwrap_or_default()
    }

    async fn sign_personal_message(&self, data: &str) -> Result<String, SignerError> {
        let message = match data.strip_prefix("0x") {
            Some(_) => from_hex(data).unwrap_or_else(|_| data.as_bytes().to_vec()),
            None => data.as_bytes().to_vec(),
        };
        let signature = self.sign_message(&message)?;
        Ok(to_hex_prefixed(&signature))
    }

    async fn send_transaction(&self, transaction: &Value) -> Result<String, SignerError> {
        let raw = self.signed_transaction(transaction).await?;
        let dispatcher = self.dispatcher.as_ref().ok_or_else(|| {
            SignerError::Unsupported("broadcasting needs a chain provider".to_string())
        })?;
        let hash = dispatcher
            .perform(&PerformRequest::BroadcastTransaction {
                signed_transaction: to_hex_prefixed(&raw),
            })
            .await
            .map_err(chain_error)?;
        info!("Broadcast transaction {}", hash);
        hash.as_str()
            .map(str::to_string)
            .ok_or_else(|| SignerError::Signing(format!("unexpected transaction hash {}", hash)))
    }

    async fn sign_transaction(&self, transaction: &Value) -> Result<String, SignerError> {
        let raw = self.signed_transaction(transaction).await?;
        debug!("Signed transaction of {} bytes", raw.len());
        Ok(to_hex_prefixed(&raw))
    }
}

fn chain_error(error: ProviderError) -> SignerError {
    SignerError::Signing(error.to_string())
}

fn quantity(value: Value) -> Result<U256, SignerError> {
    serde_json::from_value(value)
        .map_err(|e| SignerError::Signing(format!("invalid quantity from chain: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::fallback::tests::ScriptedProvider;
    use crate::blockchain::provider::ProviderEndpoint;
    use crate::utils::crypto::checksum_address;
    use ethers_core::types::Signature;
    use ethers_core::utils::rlp::Rlp;

    fn complete_transaction() -> Value {
        json!({
            "to": "0x00000000000000000000000000000000000000c0",
            "value": "0x1",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "nonce": "0x0",
            "chainId": "0x1"
        })
    }

    #[test]
    fn test_address_of_known_key() {
        // Private key 1 controls the address of the generator point.
        let manager = KeyManager::from_hex_key(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(
            checksum_address(&manager.address()),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
        assert!(KeyManager::from_hex_key("0x00").is_err());
    }

    #[tokio::test]
    async fn test_personal_signature_recovers_to_address() {
        let manager = KeyManager::from_seed(3);
        let signature = manager.sign_personal_message("hello").await.unwrap();

        let signature: Signature = signature.parse().unwrap();
        assert_eq!(signature.recover("hello").unwrap(), manager.address());
    }

    #[tokio::test]
    async fn test_hex_message_is_signed_as_bytes() {
        let manager = KeyManager::from_seed(3);
        let signature: Signature = manager
            .sign_personal_message("0x68656c6c6f")
            .await
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(signature.recover("hello").unwrap(), manager.address());
    }

    #[tokio::test]
    async fn test_sign_transaction_without_provider() {
        let manager = KeyManager::from_seed(4);
        let raw = manager.sign_transaction(&complete_transaction()).await.unwrap();

        let bytes = from_hex(&raw).unwrap();
        let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(&bytes)).unwrap();
        assert_eq!(signature.recover(tx.sighash()).unwrap(), manager.address());
    }

    #[tokio::test]
    async fn test_incomplete_transaction_needs_provider() {
        let manager = KeyManager::from_seed(4);
        let err = manager
            .sign_transaction(&json!({"to": "0x00000000000000000000000000000000000000c0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_send_transaction_broadcasts() {
        let node = ScriptedProvider::ok("node", json!("0xfeed"));
        let dispatcher = Arc::new(FallbackDispatcher::new(vec![
            node.clone() as Arc<dyn ProviderEndpoint>
        ]));
        let manager = KeyManager::from_seed(5).with_dispatcher(dispatcher);

        let hash = manager.send_transaction(&complete_transaction()).await.unwrap();
        assert_eq!(hash, "0xfeed");
        assert_eq!(node.call_count(), 1);
    }
}
