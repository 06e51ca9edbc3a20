// src/storage/mod.rs
//! Storage backends for view key/value data.

pub mod key_value;
