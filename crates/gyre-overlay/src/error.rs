//! Error types for overlay operations.

use gyre_ring::RingError;
use gyre_types::NodeId;

/// Errors returned by public overlay operations.
///
/// Validation failures are reported before any state changes, so a
/// returned error always leaves the overlay as it was. Internal
/// inconsistencies (a finger naming a departed node) never surface here;
/// they are logged to the sink and repaired by the next stabilization
/// sweep.
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    /// The id lies outside the keyspace `[0, 2^m)`.
    #[error("id {id} outside ring [0, {ring_size})")]
    IdOutOfRange {
        /// The rejected id.
        id: u64,
        /// The ring size `2^m`.
        ring_size: u64,
    },

    /// A node with this id already exists.
    #[error("node id already present: {0}")]
    IdConflict(NodeId),

    /// The operation referenced a node that is not in the overlay.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Removing the only remaining node is forbidden.
    #[error("cannot remove the last node")]
    LastNodeRemoval,

    /// The overlay holds no nodes, so there is nowhere to route from.
    #[error("overlay has no nodes")]
    NoNodes,

    /// No item is stored under this name.
    #[error("name not found: {0}")]
    NameNotFound(String),

    /// The snapshot document carries an unknown format version.
    #[error("snapshot version mismatch: expected {expected}, found {found}")]
    SnapshotVersionMismatch {
        /// Version this build understands.
        expected: u32,
        /// Version found in the document.
        found: u32,
    },

    /// The snapshot document does not describe a valid overlay.
    #[error("snapshot inconsistent: {reason}")]
    SnapshotInconsistent {
        /// What was wrong with the document.
        reason: String,
    },

    /// Stabilization kept mutating past the configured pass cap.
    #[error("stabilization did not converge within {passes} passes")]
    RebalanceDivergence {
        /// The pass cap that was exhausted.
        passes: usize,
    },

    /// The ring exponent was rejected.
    #[error(transparent)]
    Ring(#[from] RingError),
}
