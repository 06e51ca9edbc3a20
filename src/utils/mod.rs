// src/utils/mod.rs
//! Helper functions shared across the crate.

pub mod crypto;
pub mod encoding;
pub mod serialization;
