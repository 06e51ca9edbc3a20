// src/rpc/mod.rs
//! JSON-RPC 2.0 messaging between a host and a sandboxed view.

pub mod envelope;
pub mod message;
pub mod transport;
