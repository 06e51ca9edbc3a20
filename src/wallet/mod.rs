// src/wallet/mod.rs
//! Wallet signer implementations.

pub mod key_management;
