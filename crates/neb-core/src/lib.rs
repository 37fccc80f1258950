//! Core of the neb chat-bot host.
//!
//! Owns the per-identity client registry, message dispatch to services and the
//! encrypted send path. The chat protocol, the group-encryption primitives and
//! persistence live behind ports (traits) implemented in adapter crates.

pub mod admin;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod events;
pub mod guard;
pub mod locks;
pub mod logging;
pub mod matcher;
pub mod outbound;
pub mod ports;
pub mod registry;
pub mod rooms;
pub mod service;
pub mod session;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
