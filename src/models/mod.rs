// src/models/mod.rs
//! Data models shared by verification and the sandbox channel.

pub mod document;
pub mod key;
pub mod token;
pub mod verdict;
