// src/error.rs
//! Error taxonomy for the trust & channel core.
//!
//! Verification errors never escape the verification boundary: they are turned
//! into a [`TrustVerdict::Failed`](crate::models::verdict::TrustVerdict) reason.
//! RPC, provider and channel errors are surfaced only to the caller that
//! triggered them.

use serde_json::Value;
use thiserror::Error;

/// Failure while verifying the XML signature of a TokenScript document.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("multiple signature elements")]
    MultipleSignatures,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A reference digest did not match the canonicalized content.
    #[error("signature verification failed: digest mismatch for reference \"{uri}\"")]
    DigestMismatch { uri: String },

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("certificate subject key mismatch")]
    SubjectKeyMismatch,

    #[error("missing issuer public key extension")]
    MissingIssuerKey,

    #[error("invalid issuer public key extension: {0}")]
    InvalidIssuerKey(String),

    #[error("certificate self-verification failed")]
    SelfVerificationFailed,

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Failure while walking an embedded certificate chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("signer certificate not found in chain")]
    SignerNotFound,

    #[error("certificate could not be parsed: {0}")]
    Certificate(String),

    #[error("certificate issuer not found in chain for subject \"{subject}\"")]
    IssuerNotFound { subject: String },

    #[error("certificate path is cyclic")]
    CyclicPath,

    #[error("root certificate missing issuer public key extension")]
    MissingRootKey,

    #[error("root certificate issuer public key is invalid: {0}")]
    InvalidRootKey(String),
}

/// Errors raised by the JSON-RPC envelope layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RpcError {
    #[error("RPC ID \"{id}\" timed out after {millis} milliseconds")]
    Timeout { id: String, millis: u64 },

    #[error("{code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("response for RPC ID \"{id}\" did not have error or result key")]
    MalformedResponse { id: String },

    #[error("channel closed")]
    ChannelClosed,
}

/// Errors raised by a chain RPC backend or the fallback dispatcher.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider connection failed: {0}")]
    Connectivity(String),

    #[error("provider request timed out: {0}")]
    Timeout(String),

    /// A JSON-RPC error which does not indicate a deterministic execution failure.
    #[error("provider returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The call itself failed (revert). Every backend would answer the same.
    #[error("call exception: {message}")]
    CallException { message: String, data: Option<Value> },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("no providers configured")]
    NoProvidersConfigured,
}

impl ProviderError {
    /// Whether the dispatcher may try the next provider after this error.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            ProviderError::Connectivity(_)
                | ProviderError::Timeout(_)
                | ProviderError::Rpc { .. }
                | ProviderError::InvalidResponse(_)
        )
    }

    /// JSON-RPC error code used when relaying this error to a view.
    pub fn rpc_code(&self) -> i64 {
        match self {
            ProviderError::Rpc { code, .. } => *code,
            ProviderError::CallException { .. } => 3,
            ProviderError::NoProvidersConfigured => -32002,
            _ => -32603,
        }
    }
}

/// Errors raised by the sandbox channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,

    #[error("channel not ready (state {0})")]
    NotReady(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    /// The far end answered a callback with an error.
    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Errors raised by a wallet signer collaborator.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Signing(String),

    #[error("invalid message data: {0}")]
    InvalidData(String),

    #[error("operation not supported by this wallet: {0}")]
    Unsupported(String),

    #[error("user rejected the request")]
    Rejected,
}

/// Errors raised by a storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}
