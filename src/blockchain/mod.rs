// src/blockchain/mod.rs
//! Chain RPC access with provider fallback.

pub mod fallback;
pub mod network;
pub mod provider;
