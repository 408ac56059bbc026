//! Storage layer for Skylark
//!
//! This crate provides key-value storage with change notifications and the
//! encrypted session vault.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kv;
pub mod vault;

pub use kv::{KvConfig, KvError, KvStore, Subscription};
pub use vault::{SessionVault, VaultConfig, VaultError};
