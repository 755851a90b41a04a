//! Per-node key-value storage for Gyre.
//!
//! This crate provides:
//!
//! - [`NodeStore`] — the map each overlay node keeps from ring keys to
//!   named items, with interval-based draining for join/leave migration.
//! - [`ValueCodec`] — the pluggable at-rest transformation applied to
//!   values on put and get, with [`IdentityCodec`] as the default.

mod codec;
mod store;

pub use codec::{IdentityCodec, ValueCodec};
pub use store::{NodeStore, StoredItem};
