//! Shared types for the Gyre overlay.
//!
//! This crate defines the types used across the Gyre workspace:
//! ring-point identifiers ([`NodeId`], [`Key`]), overlay configuration
//! ([`OverlayConfig`]), and the observation layer ([`events`]).

pub mod events;

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_point {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw ring position.
            pub const fn new(point: u64) -> Self {
                Self(point)
            }

            /// Return the raw ring position.
            pub const fn value(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(point: u64) -> Self {
                Self(point)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_point!(
    /// Identifier of an overlay node: a point on the ring `[0, 2^m)`.
    NodeId
);

define_point!(
    /// Key of a stored item: `H(name)` truncated to `m` bits, a point on
    /// the same ring as node identifiers.
    Key
);

impl Key {
    /// The node id occupying the same ring position as this key.
    pub const fn as_node_id(self) -> NodeId {
        NodeId::new(self.0)
    }
}

impl NodeId {
    /// The ring position of this node interpreted as a key.
    pub const fn as_key(self) -> Key {
        Key::new(self.0)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration consumed by the overlay constructor.
///
/// `m` is the ring exponent: the keyspace is `[0, 2^m)`. It is fixed for
/// the lifetime of the overlay and passed into every node operation;
/// nodes never read globals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Ring exponent, `1 ≤ m ≤ 32`.
    pub m: u8,
    /// Node ids to link into a ring at construction. May be empty.
    pub initial_ids: Vec<u64>,
    /// Upper bound on stabilization passes per `rebalance` call.
    ///
    /// `None` selects the default of `m + 2` (one pass per halving of the
    /// ring plus slack).
    pub stabilization_passes_cap: Option<usize>,
}

impl OverlayConfig {
    /// Configuration for an overlay over `[0, 2^m)` with no initial nodes.
    pub fn with_exponent(m: u8) -> Self {
        Self {
            m,
            initial_ids: Vec::new(),
            stabilization_passes_cap: None,
        }
    }

    /// Set the initial node ids.
    pub fn initial_ids(mut self, ids: impl Into<Vec<u64>>) -> Self {
        self.initial_ids = ids.into();
        self
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self::with_exponent(8)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
