// src/security/contract_key.rs
//! Signer authority over the contracts a TokenScript is written for.
//!
//! A document is authenticated for a contract origin when the address of its
//! authoritative key administers that contract: it is the `owner()` of an
//! Ownable contract, or holds the default admin role or the
//! `TS_SCRIPT_ADMIN` role of an AccessControl contract.

use crate::blockchain::fallback::FallbackDispatcher;
use crate::blockchain::provider::PerformRequest;
use crate::error::ProviderError;
use crate::models::verdict::TrustVerdict;
use crate::security::trust::{key_address, OriginStatus, SecurityStatus};
use crate::utils::crypto::hash_data;
use crate::utils::encoding::{from_hex, to_hex_prefixed};
use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::Address;
use ethers_core::utils::id;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// AccessControl role granted to accounts allowed to sign scripts.
pub const SCRIPT_ADMIN_ROLE: &str = "TS_SCRIPT_ADMIN";

/// OpenZeppelin `DEFAULT_ADMIN_ROLE`.
pub const DEFAULT_ADMIN_ROLE: [u8; 32] = [0u8; 32];

/// A contract the TokenScript declares as a token origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractOrigin {
    pub name: String,
    pub address: Address,
}

/// Reads contract ownership and roles through a [`FallbackDispatcher`].
pub struct ContractKeyResolver {
    dispatcher: Arc<FallbackDispatcher>,
}

impl ContractKeyResolver {
    pub fn new(dispatcher: Arc<FallbackDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Reads `owner()` of an Ownable contract.
    ///
    /// # Arguments
    /// * `contract` - Address of the contract
    ///
    /// # Returns
    /// The owner address
    ///
    /// # Errors
    /// - [`ProviderError::CallException`] when the contract is not Ownable
    /// - [`ProviderError::InvalidResponse`] when the answer is not an address
    pub async fn owner(&self, contract: Address) -> Result<Address, ProviderError> {
        let output = self.call(contract, id("owner()").to_vec()).await?;
        decode_single(ParamType::Address, &output)?
            .into_address()
            .ok_or_else(|| ProviderError::InvalidResponse("owner() did not return an address".to_string()))
    }

    /// Calls AccessControl `hasRole(role, account)`.
    pub async fn has_role(
        &self,
        contract: Address,
        role: [u8; 32],
        account: Address,
    ) -> Result<bool, ProviderError> {
        let mut data = id("hasRole(bytes32,address)").to_vec();
        data.extend(abi::encode(&[Token::FixedBytes(role.to_vec()), Token::Address(account)]));
        let output = self.call(contract, data).await?;
        decode_single(ParamType::Bool, &output)?
            .into_bool()
            .ok_or_else(|| ProviderError::InvalidResponse("hasRole() did not return a bool".to_string()))
    }

    /// Whether `signer` owns `contract` or holds one of its admin roles.
    ///
    /// Each check is tried on its own. A failing call counts as "no" and is
    /// logged.
    pub async fn is_admin(&self, contract: Address, signer: Address) -> bool {
        match self.owner(contract).await {
            Ok(owner) if owner == signer => return true,
            Ok(owner) => debug!("{:?} is not owner of {:?} (owner {:?})", signer, contract, owner),
            Err(e) => debug!("owner() unavailable on {:?}: {}", contract, e),
        }

        for role in [DEFAULT_ADMIN_ROLE, hash_data(SCRIPT_ADMIN_ROLE.as_bytes())] {
            match self.has_role(contract, role, signer).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!("hasRole() failed on {:?}: {}", contract, e);
                }
            }
        }
        false
    }

    /// Security status of one contract origin for a verification verdict.
    pub async fn origin_status(&self, origin: &ContractOrigin, verdict: &TrustVerdict) -> OriginStatus {
        let (status, text) = match verdict {
            TrustVerdict::Verified(keys) => match key_address(&keys.authoritative) {
                Some(signer) => {
                    if self.is_admin(origin.address, signer).await {
                        (
                            SecurityStatus::Valid,
                            format!("The TokenScript signer is an admin of {}", origin.name),
                        )
                    } else {
                        (
                            SecurityStatus::Invalid,
                            format!("The TokenScript signer is not an admin of {}", origin.name),
                        )
                    }
                }
                None => (
                    SecurityStatus::Invalid,
                    "The signing key has no Ethereum address".to_string(),
                ),
            },
            TrustVerdict::NoSignature => (SecurityStatus::Invalid, "The TokenScript is not signed".to_string()),
            TrustVerdict::Failed { .. } => (
                SecurityStatus::Invalid,
                "The TokenScript signature is invalid".to_string(),
            ),
        };
        OriginStatus {
            name: origin.name.clone(),
            status,
            status_text: Some(text),
        }
    }

    async fn call(&self, contract: Address, data: Vec<u8>) -> Result<Vec<u8>, ProviderError> {
        let request = PerformRequest::Call {
            transaction: json!({ "to": format!("{:?}", contract), "data": to_hex_prefixed(&data) }),
            block: "latest".to_string(),
        };
        let value = self.dispatcher.perform(&request).await?;
        match value {
            Value::String(hex) => from_hex(&hex).map_err(ProviderError::InvalidResponse),
            other => Err(ProviderError::InvalidResponse(format!(
                "eth_call returned {}",
                other
            ))),
        }
    }
}

fn decode_single(kind: ParamType, output: &[u8]) -> Result<Token, ProviderError> {
    abi::decode(&[kind], output)
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::InvalidResponse("empty call result".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::provider::ProviderEndpoint;
    use crate::models::verdict::SignerKeys;
    use crate::test_support::{signing_key, uncompressed_point};
    use crate::utils::crypto::eth_address;
    use async_trait::async_trait;

    /// Answers `owner()` and `hasRole()` for a single contract.
    struct ContractStub {
        owner: Option<Address>,
        roles: Vec<([u8; 32], Address)>,
    }

    #[async_trait]
    impl ProviderEndpoint for ContractStub {
        fn name(&self) -> &str {
            "contract"
        }

        async fn perform(&self, request: &PerformRequest) -> Result<Value, ProviderError> {
            let transaction = match request {
                PerformRequest::Call { transaction, .. } => transaction,
                other => panic!("unexpected request {:?}", other),
            };
            let data = from_hex(transaction["data"].as_str().unwrap()).unwrap();
            let revert = || ProviderError::CallException {
                message: "execution reverted".to_string(),
                data: None,
            };

            let output = if data[..4] == id("owner()") {
                abi::encode(&[Token::Address(self.owner.ok_or_else(revert)?)])
            } else if data[..4] == id("hasRole(bytes32,address)") {
                let args = abi::decode(&[ParamType::FixedBytes(32), ParamType::Address], &data[4..]).unwrap();
                let role: [u8; 32] = args[0].clone().into_fixed_bytes().unwrap().try_into().unwrap();
                let account = args[1].clone().into_address().unwrap();
                abi::encode(&[Token::Bool(self.roles.contains(&(role, account)))])
            } else {
                return Err(revert());
            };
            Ok(json!(to_hex_prefixed(&output)))
        }

        async fn destroy(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    const CONTRACT: Address = Address::repeat_byte(0xc0);

    fn resolver(stub: ContractStub) -> ContractKeyResolver {
        ContractKeyResolver::new(Arc::new(FallbackDispatcher::new(vec![
            Arc::new(stub) as Arc<dyn ProviderEndpoint>
        ])))
    }

    fn signer(seed: u8) -> (SignerKeys, Address) {
        let point = uncompressed_point(&signing_key(seed));
        let keys = SignerKeys {
            authoritative: to_hex_prefixed(&point),
            signing: to_hex_prefixed(&point),
        };
        (keys, eth_address(&point).unwrap())
    }

    fn origin() -> ContractOrigin {
        ContractOrigin {
            name: "Ticket".to_string(),
            address: CONTRACT,
        }
    }

    #[tokio::test]
    async fn test_owner_is_admin() {
        let (keys, address) = signer(80);
        let resolver = resolver(ContractStub {
            owner: Some(address),
            roles: Vec::new(),
        });
        assert_eq!(resolver.owner(CONTRACT).await.unwrap(), address);

        let status = resolver.origin_status(&origin(), &TrustVerdict::Verified(keys)).await;
        assert_eq!(status.status, SecurityStatus::Valid);
        assert_eq!(status.name, "Ticket");
    }

    #[tokio::test]
    async fn test_script_admin_role_without_ownable() {
        let (keys, address) = signer(81);
        let resolver = resolver(ContractStub {
            owner: None,
            roles: vec![(hash_data(SCRIPT_ADMIN_ROLE.as_bytes()), address)],
        });
        assert!(matches!(
            resolver.owner(CONTRACT).await,
            Err(ProviderError::CallException { .. })
        ));
        let status = resolver.origin_status(&origin(), &TrustVerdict::Verified(keys)).await;
        assert_eq!(status.status, SecurityStatus::Valid);
    }

    #[tokio::test]
    async fn test_default_admin_role() {
        let (_, address) = signer(82);
        let resolver = resolver(ContractStub {
            owner: Some(Address::repeat_byte(1)),
            roles: vec![(DEFAULT_ADMIN_ROLE, address)],
        });
        assert!(resolver.is_admin(CONTRACT, address).await);
    }

    #[tokio::test]
    async fn test_unrelated_signer_is_invalid() {
        let (keys, _) = signer(83);
        let resolver = resolver(ContractStub {
            owner: Some(Address::repeat_byte(1)),
            roles: Vec::new(),
        });
        let status = resolver.origin_status(&origin(), &TrustVerdict::Verified(keys)).await;
        assert_eq!(status.status, SecurityStatus::Invalid);
        assert!(status.status_text.unwrap().contains("not an admin of Ticket"));

        let unsigned = resolver.origin_status(&origin(), &TrustVerdict::NoSignature).await;
        assert_eq!(unsigned.status, SecurityStatus::Invalid);
    }
}
