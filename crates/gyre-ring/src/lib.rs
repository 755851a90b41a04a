//! Ring arithmetic for the Gyre keyspace.
//!
//! This crate implements the modular arithmetic every other Gyre component
//! is built on: the keyspace `[0, 2^m)` as a clockwise ring, forward
//! distance, open and half-open interval membership with the wrap rules
//! that make single-node rings work, finger start positions, and the
//! stable SHA-1-derived hash mapping arbitrary byte strings onto the ring.

mod error;
mod space;

pub use error::RingError;
pub use space::KeySpace;
