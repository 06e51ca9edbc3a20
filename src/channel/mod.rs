// src/channel/mod.rs
//! Message channel between a host page and a sandboxed TokenScript view.
//!
//! [`host::HostChannel`] runs in the embedding page and serves requests with
//! its [`host::HostContext`]. [`view::ViewChannel`] runs inside the view.

pub mod collaborators;
pub mod host;
pub mod lifecycle;
pub mod messages;
pub mod subscription;
pub mod view;
