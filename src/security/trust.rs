// src/security/trust.rs
//! Trust decisions on top of a [`TrustVerdict`].
//!
//! The verification engine only establishes which key vouches for a
//! document. This module compares that key with configured trusted keys and
//! folds per-origin results into a single security status for the UI layer.

use crate::models::verdict::{SignerKeys, TrustVerdict};
use crate::utils::crypto::eth_address;
use crate::utils::encoding::from_hex;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};

/// How a trusted key value is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrustedKeyType {
    /// Hex of the raw public key.
    Ec,
    /// Ethereum address derived from the public key.
    EthAddress,
}

/// An allow-listed signing authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedKey {
    #[serde(alias = "issuer_name")]
    pub issuer_name: String,
    #[serde(alias = "value_type")]
    pub value_type: TrustedKeyType,
    pub value: String,
}

/// Matches verified signer keys against an allow-list.
pub struct TrustedKeyResolver<'a> {
    trusted_keys: &'a [TrustedKey],
}

impl<'a> TrustedKeyResolver<'a> {
    pub fn new(trusted_keys: &'a [TrustedKey]) -> Self {
        Self { trusted_keys }
    }

    /// First trusted key matching the authoritative or the signing key.
    ///
    /// Comparison is case-insensitive. Address entries are compared with the
    /// Ethereum address of each key, which only exists for secp256k1 keys.
    pub fn trusted_key(&self, keys: &SignerKeys) -> Option<&'a TrustedKey> {
        let auth_address = key_address(&keys.authoritative);
        let signer_address = key_address(&keys.signing);

        self.trusted_keys.iter().find(|trusted| match trusted.value_type {
            TrustedKeyType::EthAddress => {
                let matches = |address: &Option<Address>| {
                    address
                        .map(|a| format!("{:?}", a).eq_ignore_ascii_case(trusted.value.trim()))
                        .unwrap_or(false)
                };
                matches(&auth_address) || matches(&signer_address)
            }
            TrustedKeyType::Ec => {
                keys.authoritative.eq_ignore_ascii_case(trusted.value.trim())
                    || keys.signing.eq_ignore_ascii_case(trusted.value.trim())
            }
        })
    }
}

/// Ethereum address of a hex-encoded secp256k1 public key.
pub(crate) fn key_address(key_hex: &str) -> Option<Address> {
    from_hex(key_hex).ok().and_then(|bytes| eth_address(&bytes))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityStatus {
    #[serde(rename = "valid")]
    Valid,
    #[serde(rename = "warn")]
    Warning,
    #[serde(rename = "invalid")]
    Invalid,
}

/// Security status of one token origin (contract or attestation issuer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginStatus {
    pub name: String,
    pub status: SecurityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
}

/// Security details handed to the security-status UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityInfo {
    pub verdict: TrustVerdict,
    pub status: SecurityStatus,
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_key: Option<TrustedKey>,
    pub origin_statuses: Vec<OriginStatus>,
}

/// Default mapping of a verdict and origin results to a [`SecurityStatus`].
pub struct TrustDecision;

impl TrustDecision {
    /// Folds a verdict, the allow-list and per-origin results into one status.
    ///
    /// # Arguments
    /// * `verdict` - Outcome of signature verification
    /// * `trusted_keys` - Allow-listed signing authorities
    /// * `origin_statuses` - Results of the per-origin checks, possibly empty
    ///
    /// # Returns
    /// [`SecurityInfo`] with the matched trusted key, if any. A failed verdict
    /// is always invalid, then any invalid origin, then a trusted key makes the
    /// document valid. An unsigned document with no origins is a warning.
    pub fn evaluate(
        verdict: TrustVerdict,
        trusted_keys: &[TrustedKey],
        origin_statuses: Vec<OriginStatus>,
    ) -> SecurityInfo {
        let trusted_key = match &verdict {
            TrustVerdict::Verified(keys) => TrustedKeyResolver::new(trusted_keys)
                .trusted_key(keys)
                .cloned(),
            _ => None,
        };

        let invalid_origins = origin_statuses
            .iter()
            .filter(|origin| origin.status == SecurityStatus::Invalid)
            .count();

        let (status, status_text) = if let TrustVerdict::Failed { .. } = verdict {
            (
                SecurityStatus::Invalid,
                "TokenScript authenticity and integrity cannot be established",
            )
        } else if invalid_origins > 0 && invalid_origins < origin_statuses.len() {
            (
                SecurityStatus::Invalid,
                "The TokenScript is not authenticated for some token origins.\nTake care when signing transactions for these tokens.",
            )
        } else if invalid_origins > 0 {
            (
                SecurityStatus::Invalid,
                "The TokenScript is not authenticated for any listed token origins.\nSign any transactions with caution.",
            )
        } else if trusted_key.is_some() {
            (SecurityStatus::Valid, "The TokenScript is signed by a trusted key")
        } else if origin_statuses.is_empty() && verdict == TrustVerdict::NoSignature {
            (SecurityStatus::Warning, "The TokenScript is not signed")
        } else {
            (
                SecurityStatus::Valid,
                "The TokenScript is authenticated for use with all specified token origins.",
            )
        };

        SecurityInfo {
            verdict,
            status,
            status_text: status_text.to_string(),
            trusted_key,
            origin_statuses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{signing_key, uncompressed_point};
    use crate::utils::crypto::checksum_address;
    use crate::utils::encoding::to_hex_prefixed;

    fn keys(auth_seed: u8, signer_seed: u8) -> SignerKeys {
        SignerKeys {
            authoritative: to_hex_prefixed(&uncompressed_point(&signing_key(auth_seed))),
            signing: to_hex_prefixed(&uncompressed_point(&signing_key(signer_seed))),
        }
    }

    fn origin(status: SecurityStatus) -> OriginStatus {
        OriginStatus {
            name: "Token".to_string(),
            status,
            status_text: None,
        }
    }

    #[test]
    fn test_match_by_ec_key_case_insensitive() {
        let keys = keys(60, 61);
        let trusted = vec![TrustedKey {
            issuer_name: "Smart Token Labs".to_string(),
            value_type: TrustedKeyType::Ec,
            value: keys.signing.to_uppercase().replacen("0X", "0x", 1),
        }];
        let found = TrustedKeyResolver::new(&trusted).trusted_key(&keys).unwrap();
        assert_eq!(found.issuer_name, "Smart Token Labs");
    }

    #[test]
    fn test_match_by_eth_address() {
        let keys = keys(62, 63);
        let address = eth_address(&uncompressed_point(&signing_key(62))).unwrap();
        let trusted = vec![TrustedKey {
            issuer_name: "Owner".to_string(),
            value_type: TrustedKeyType::EthAddress,
            value: checksum_address(&address),
        }];
        assert!(TrustedKeyResolver::new(&trusted).trusted_key(&keys).is_some());

        let other = vec![TrustedKey {
            issuer_name: "Other".to_string(),
            value_type: TrustedKeyType::EthAddress,
            value: "0x0000000000000000000000000000000000000001".to_string(),
        }];
        assert!(TrustedKeyResolver::new(&other).trusted_key(&keys).is_none());
    }

    #[test]
    fn test_failed_verdict_is_invalid() {
        let info = TrustDecision::evaluate(TrustVerdict::failed("bad"), &[], vec![]);
        assert_eq!(info.status, SecurityStatus::Invalid);
    }

    #[test]
    fn test_unsigned_without_origins_is_warning() {
        let info = TrustDecision::evaluate(TrustVerdict::NoSignature, &[], vec![]);
        assert_eq!(info.status, SecurityStatus::Warning);
    }

    #[test]
    fn test_origin_failures() {
        let verdict = TrustVerdict::Verified(keys(64, 64));
        let some = TrustDecision::evaluate(
            verdict.clone(),
            &[],
            vec![origin(SecurityStatus::Valid), origin(SecurityStatus::Invalid)],
        );
        assert_eq!(some.status, SecurityStatus::Invalid);
        assert!(some.status_text.contains("some token origins"));

        let all = TrustDecision::evaluate(verdict.clone(), &[], vec![origin(SecurityStatus::Invalid)]);
        assert!(all.status_text.contains("any listed token origins"));

        let valid = TrustDecision::evaluate(verdict, &[], vec![origin(SecurityStatus::Valid)]);
        assert_eq!(valid.status, SecurityStatus::Valid);
    }

    #[test]
    fn test_trusted_key_is_valid() {
        let keys = keys(65, 66);
        let trusted = vec![TrustedKey {
            issuer_name: "Labs".to_string(),
            value_type: TrustedKeyType::Ec,
            value: keys.authoritative.clone(),
        }];
        let info = TrustDecision::evaluate(TrustVerdict::Verified(keys), &trusted, vec![]);
        assert_eq!(info.status, SecurityStatus::Valid);
        assert_eq!(info.trusted_key, Some(trusted[0].clone()));
    }
}
