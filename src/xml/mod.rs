// src/xml/mod.rs
//! XML tree and canonicalization used by signature verification.

pub mod c14n;
pub mod dom;
