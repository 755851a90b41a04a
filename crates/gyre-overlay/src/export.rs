//! Read-only graph projection of the overlay.
//!
//! The overlay emits an abstract adjacency description (labeled edges
//! plus storage annotations) and a renderer turns it into an image.
//! Duplicate edges (a finger that coincides with the successor, say) are
//! not suppressed; consumers may collapse them.

use std::fmt;

use gyre_types::{Key, NodeId};

use crate::overlay::Overlay;

/// Label of a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeRole {
    /// The successor link.
    Successor,
    /// The predecessor link.
    Predecessor,
    /// Finger entry `i`.
    Finger(u8),
}

impl fmt::Display for EdgeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeRole::Successor => write!(f, "successor"),
            EdgeRole::Predecessor => write!(f, "predecessor"),
            EdgeRole::Finger(i) => write!(f, "finger_{i}"),
        }
    }
}

/// One labeled edge of the overlay graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    /// Source node.
    pub from: NodeId,
    /// Edge label.
    pub role: EdgeRole,
    /// Target node.
    pub to: NodeId,
}

/// One stored item, annotated onto its holding node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreAnnotation {
    /// The node holding the item.
    pub node: NodeId,
    /// The item's ring key.
    pub key: Key,
    /// The item's name.
    pub name: String,
}

/// The complete projection: every link, every finger, every stored item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphView {
    /// Labeled edges, grouped by source node in ascending id order.
    pub edges: Vec<GraphEdge>,
    /// Storage annotations in ascending `(node, key)` order.
    pub annotations: Vec<StoreAnnotation>,
}

impl Overlay {
    /// Project the overlay into a renderable graph description.
    pub fn export_graph(&self) -> GraphView {
        let mut view = GraphView::default();
        for node in self.nodes.values() {
            let from = node.id();
            view.edges.push(GraphEdge {
                from,
                role: EdgeRole::Successor,
                to: node.successor(),
            });
            if let Some(predecessor) = node.predecessor() {
                view.edges.push(GraphEdge {
                    from,
                    role: EdgeRole::Predecessor,
                    to: predecessor,
                });
            }
            for (i, &finger) in node.fingers().iter().enumerate() {
                view.edges.push(GraphEdge {
                    from,
                    role: EdgeRole::Finger(i as u8),
                    to: finger,
                });
            }
            for (key, item) in node.store.iter() {
                view.annotations.push(StoreAnnotation {
                    node: from,
                    key: Key::new(key),
                    name: item.name.clone(),
                });
            }
        }
        view
    }
}
