//! The Gyre overlay core.
//!
//! A single-process Chord DHT: an id-indexed table of nodes partitioning
//! the keyspace `[0, 2^m)`, O(log N) lookup through finger tables, a
//! stabilization protocol that restores the ring after joins and leaves,
//! key migration that preserves stored data under topology change, and a
//! snapshot document for durability.
//!
//! All operations are serialized through the [`Overlay`]: each call runs
//! to completion before the next begins. Observation flows through the
//! [`Sink`](gyre_types::events::Sink) the overlay was built with.

mod error;
mod export;
mod health;
mod node;
mod overlay;
mod snapshot;


pub use error::OverlayError;
pub use export::{EdgeRole, GraphEdge, GraphView, StoreAnnotation};
pub use health::HealthReport;
pub use node::{Node, NodeCounters};
pub use overlay::{NodeLoad, Overlay, OverlayStats};
pub use snapshot::{NodeRecord, SnapshotDocument, StoreRecord, SNAPSHOT_VERSION};
