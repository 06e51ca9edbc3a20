// src/lib.rs

//! # TokenScript Trust & Channel Core
//!
//! Establishes whether a TokenScript document can be trusted and brokers the
//! messages between a host page and the sandboxed view the document renders.
//!
//! ## Architecture Overview
//! 1. **Security Layer**: XML-DSig verification, X.509 chains, trust decisions
//! 2. **Blockchain Layer**: JSON-RPC providers behind a fallback dispatcher
//! 3. **Messaging Layer**: JSON-RPC envelope and the host/view sandbox channel
//! 4. **Wallet & Storage**: Local signer and key/value storage collaborators

pub mod blockchain;
pub mod channel;
pub mod config;
pub mod error;
pub mod models;
pub mod rpc;
pub mod security;
pub mod storage;
pub mod utils;
pub mod wallet;
pub mod xml;

#[cfg(test)]
mod test_support;

pub use models::document::TokenScriptDocument;
pub use models::verdict::TrustVerdict;
pub use security::dsig::verify_signature;
