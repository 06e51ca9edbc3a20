// src/models/verdict.rs
//! Outcome of TokenScript signature verification.

use serde::{Deserialize, Serialize};

/// Keys established by a successful verification.
///
/// `authoritative` is the key that trust decisions compare against
/// allow-lists: the signing key itself for raw-key signatures, or the root key
/// embedded in the certificate for certificate-backed signatures. `signing`
/// is the key that produced the XML signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerKeys {
    pub authoritative: String,
    pub signing: String,
}

/// Terminal result of verifying a TokenScript document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TrustVerdict {
    /// The document carries no XML signature.
    NoSignature,
    Verified(SignerKeys),
    Failed { reason: String },
}

impl TrustVerdict {
    pub fn failed(reason: impl Into<String>) -> Self {
        TrustVerdict::Failed {
            reason: reason.into(),
        }
    }

    /// The lowercase hex key to compare against allow-lists.
    pub fn signer_key_hex(&self) -> Option<&str> {
        match self {
            TrustVerdict::Verified(keys) => Some(&keys.authoritative),
            _ => None,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, TrustVerdict::Verified(_))
    }
}
