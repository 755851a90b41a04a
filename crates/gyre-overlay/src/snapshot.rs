//! Snapshot documents: a self-contained capture of the full overlay state.
//!
//! The document is a plain `serde` struct tree; any serializer can encode
//! it. Restoration builds a candidate overlay first and verifies every
//! invariant on it before touching the live one, so a failed restore
//! leaves the prior state intact.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use gyre_ring::KeySpace;
use gyre_store::NodeStore;
use gyre_types::events::OpKind;
use gyre_types::NodeId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::OverlayError;
use crate::node::Node;
use crate::overlay::Overlay;

/// Current snapshot document format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One stored item inside a [`NodeRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    /// Ring key the item lives under.
    pub key: u64,
    /// The name the item was stored with.
    pub name: String,
    /// The at-rest value bytes (wrapped form).
    pub value: Vec<u8>,
}

/// Full state of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node id.
    pub id: u64,
    /// Successor link.
    pub successor_id: u64,
    /// Predecessor link, if settled.
    pub predecessor_id: Option<u64>,
    /// Finger entries, exactly `m` of them.
    pub finger_ids: Vec<u64>,
    /// Items stored on this node, ascending key order.
    pub store: Vec<StoreRecord>,
}

/// A self-contained capture of the overlay: ring parameter, every node,
/// every link, every finger, every stored item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    /// Document format version, [`SNAPSHOT_VERSION`].
    pub version: u32,
    /// Ring exponent of the captured overlay.
    pub m: u8,
    /// Unix seconds when the snapshot was taken.
    pub created_at: u64,
    /// Node records, ascending id order.
    pub nodes: Vec<NodeRecord>,
}

impl Overlay {
    /// Capture the full overlay state.
    pub fn snapshot(&self) -> SnapshotDocument {
        let nodes = self
            .nodes
            .values()
            .map(|node| NodeRecord {
                id: node.id().value(),
                successor_id: node.successor().value(),
                predecessor_id: node.predecessor().map(NodeId::value),
                finger_ids: node.fingers().iter().map(|f| f.value()).collect(),
                store: node
                    .store
                    .iter()
                    .map(|(key, item)| StoreRecord {
                        key,
                        name: item.name.clone(),
                        value: item.value.to_vec(),
                    })
                    .collect(),
            })
            .collect();

        let doc = SnapshotDocument {
            version: SNAPSHOT_VERSION,
            m: self.space.exponent(),
            created_at: unix_now(),
            nodes,
        };
        self.record_passive(OpKind::Snapshot);
        doc
    }

    /// Replace the live state with the document's, after verifying it.
    ///
    /// Rejects an unknown format version, an exponent that disagrees with
    /// a non-empty live overlay, structural defects (out-of-range or
    /// duplicate ids, dangling references, wrong finger counts), and any
    /// document whose rebuilt overlay fails `health_check`. On error the
    /// live overlay is untouched.
    pub fn restore(&mut self, doc: &SnapshotDocument) -> Result<(), OverlayError> {
        if doc.version != SNAPSHOT_VERSION {
            return Err(OverlayError::SnapshotVersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: doc.version,
            });
        }
        if !self.nodes.is_empty() && doc.m != self.space.exponent() {
            return Err(OverlayError::SnapshotInconsistent {
                reason: format!(
                    "document ring exponent {} does not match live overlay {}",
                    doc.m,
                    self.space.exponent()
                ),
            });
        }

        let (space, nodes) = build_nodes(doc)?;
        let candidate = Overlay {
            space,
            nodes,
            seq: 0,
            passes_cap: self.passes_cap,
            sink: std::sync::Arc::new(gyre_types::events::NullSink),
            codec: std::sync::Arc::new(gyre_store::IdentityCodec),
        };
        let report = candidate.health_check();
        if !report.is_clean() {
            return Err(OverlayError::SnapshotInconsistent {
                reason: format!("{} invariant violations", report.total_violations()),
            });
        }

        self.space = candidate.space;
        self.nodes = candidate.nodes;

        info!(m = doc.m, nodes = doc.nodes.len(), "overlay restored from snapshot");
        self.seq += 1;
        self.record_passive(OpKind::Restore);
        Ok(())
    }

    /// Build a fresh overlay from a snapshot document.
    pub fn from_snapshot(doc: &SnapshotDocument) -> Result<Self, OverlayError> {
        let config = gyre_types::OverlayConfig::with_exponent(doc.m);
        let mut overlay = Overlay::new(config)?;
        overlay.restore(doc)?;
        Ok(overlay)
    }

    fn record_passive(&self, kind: OpKind) {
        let event = gyre_types::events::OpEvent::new(self.seq, kind);
        self.sink.record(&event);
    }
}

/// Rebuild the node table verbatim from a document, validating structure.
fn build_nodes(doc: &SnapshotDocument) -> Result<(KeySpace, BTreeMap<u64, Node>), OverlayError> {
    let space = KeySpace::new(doc.m).map_err(|err| OverlayError::SnapshotInconsistent {
        reason: err.to_string(),
    })?;

    let ids: std::collections::BTreeSet<u64> = doc.nodes.iter().map(|record| record.id).collect();
    if ids.len() != doc.nodes.len() {
        return Err(OverlayError::SnapshotInconsistent {
            reason: "duplicate node ids".to_string(),
        });
    }

    let mut nodes = BTreeMap::new();
    for record in &doc.nodes {
        if !space.contains(record.id) {
            return Err(OverlayError::SnapshotInconsistent {
                reason: format!("node id {} outside ring", record.id),
            });
        }
        if record.finger_ids.len() != usize::from(doc.m) {
            return Err(OverlayError::SnapshotInconsistent {
                reason: format!(
                    "node {} has {} fingers, expected {}",
                    record.id,
                    record.finger_ids.len(),
                    doc.m
                ),
            });
        }
        let mut referenced: Vec<u64> = vec![record.successor_id];
        referenced.extend(record.predecessor_id);
        referenced.extend(record.finger_ids.iter().copied());
        if let Some(missing) = referenced.iter().find(|id| !ids.contains(id)) {
            return Err(OverlayError::SnapshotInconsistent {
                reason: format!("node {} references absent node {missing}", record.id),
            });
        }

        let mut store = NodeStore::new();
        for item in &record.store {
            if !space.contains(item.key) {
                return Err(OverlayError::SnapshotInconsistent {
                    reason: format!("stored key {} outside ring", item.key),
                });
            }
            store.insert(item.key, &item.name, item.value.clone().into());
        }

        let node = Node::restored(
            NodeId::new(record.id),
            NodeId::new(record.successor_id),
            record.predecessor_id.map(NodeId::new),
            record.finger_ids.iter().copied().map(NodeId::new).collect(),
            store,
        );
        nodes.insert(record.id, node);
    }

    Ok((space, nodes))
}

/// Unix seconds, clamped to zero on a pre-epoch clock.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
