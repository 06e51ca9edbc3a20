// src/security/mod.rs
//! Signature verification and the trust decisions built on it.

pub mod certificate;
pub mod chain;
pub mod contract_key;
pub mod dsig;
pub mod trust;
