//! A single overlay participant.
//!
//! A [`Node`] holds only **ids** for its successor, predecessor and finger
//! entries; the overlay owns the id-to-node table and resolves them at
//! use. This keeps the successor cycle free of ownership cycles and makes
//! node removal a single table deletion.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use gyre_ring::KeySpace;
use gyre_store::NodeStore;
use gyre_types::NodeId;
use tracing::debug;

/// Bound on remembered routes per node.
const ROUTE_CACHE_MAX: usize = 64;

/// Per-node operation counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeCounters {
    /// Lookups that entered the overlay at this node.
    pub lookups: u64,
    /// Sum of routing hops over those lookups.
    pub lookup_hops: u64,
}

/// Small bounded cache of `key → owner` routes this node has resolved.
///
/// Consulted before finger routing when this node is the lookup entry
/// point; cleared by the overlay on every topology change. Eviction is
/// oldest-first.
#[derive(Debug, Default)]
struct RouteCache {
    inner: Mutex<RouteCacheInner>,
}

#[derive(Debug, Default)]
struct RouteCacheInner {
    /// Insertion order: front = oldest (eviction candidate).
    order: VecDeque<u64>,
    targets: HashMap<u64, NodeId>,
}

impl RouteCache {
    fn get(&self, key: u64) -> Option<NodeId> {
        let Ok(inner) = self.inner.lock() else {
            return None;
        };
        inner.targets.get(&key).copied()
    }

    fn put(&self, key: u64, target: NodeId) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.targets.insert(key, target).is_none() {
            inner.order.push_back(key);
            while inner.targets.len() > ROUTE_CACHE_MAX {
                let Some(evicted) = inner.order.pop_front() else {
                    break;
                };
                inner.targets.remove(&evicted);
            }
        }
    }

    fn clear(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.order.clear();
        inner.targets.clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.targets.len()).unwrap_or(0)
    }
}

/// One participant of the overlay, living at a fixed ring position.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    successor: NodeId,
    predecessor: Option<NodeId>,
    /// `fingers[i]` names the node owning `(id + 2^i) mod R`.
    fingers: Vec<NodeId>,
    pub(crate) store: NodeStore,
    counters: NodeCounters,
    route_cache: RouteCache,
}

impl Node {
    /// A node forming a one-node ring: successor, predecessor and every
    /// finger point back at itself.
    pub(crate) fn singleton(id: NodeId, m: u8) -> Self {
        Self {
            id,
            successor: id,
            predecessor: Some(id),
            fingers: vec![id; usize::from(m)],
            store: NodeStore::new(),
            counters: NodeCounters::default(),
            route_cache: RouteCache::default(),
        }
    }

    /// A node joining through an introducer: the successor is known, the
    /// predecessor is learned from the first stabilization, and fingers
    /// start out pointing at the successor until fixed.
    pub(crate) fn joining(id: NodeId, successor: NodeId, m: u8) -> Self {
        Self {
            id,
            successor,
            predecessor: None,
            fingers: vec![successor; usize::from(m)],
            store: NodeStore::new(),
            counters: NodeCounters::default(),
            route_cache: RouteCache::default(),
        }
    }

    /// A node rebuilt verbatim from a snapshot record.
    pub(crate) fn restored(
        id: NodeId,
        successor: NodeId,
        predecessor: Option<NodeId>,
        fingers: Vec<NodeId>,
        store: NodeStore,
    ) -> Self {
        Self {
            id,
            successor,
            predecessor,
            fingers,
            store,
            counters: NodeCounters::default(),
            route_cache: RouteCache::default(),
        }
    }

    /// This node's ring position.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The next node clockwise.
    pub fn successor(&self) -> NodeId {
        self.successor
    }

    /// The previous node clockwise, absent only transiently during a join.
    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor
    }

    /// Finger entry `i`.
    pub fn finger(&self, i: u8) -> NodeId {
        self.fingers[usize::from(i)]
    }

    /// All finger entries, index order.
    pub fn fingers(&self) -> &[NodeId] {
        &self.fingers
    }

    pub(crate) fn set_successor(&mut self, successor: NodeId) {
        self.successor = successor;
    }

    pub(crate) fn set_predecessor(&mut self, predecessor: Option<NodeId>) {
        self.predecessor = predecessor;
    }

    pub(crate) fn set_finger(&mut self, i: u8, target: NodeId) {
        self.fingers[usize::from(i)] = target;
    }

    /// The finger closest below `key` walking clockwise from this node.
    ///
    /// Scans `finger[m-1]` down to `finger[0]` and returns the first entry
    /// strictly inside `(id, key)`; this node's own id when none qualifies.
    /// Entries naming nodes absent from the table are skipped: a stale
    /// finger is an invariant violation that the next sweep repairs, not a
    /// routing failure.
    pub(crate) fn closest_preceding_finger(
        &self,
        space: &KeySpace,
        key: u64,
        alive: impl Fn(NodeId) -> bool,
    ) -> NodeId {
        for &finger in self.fingers.iter().rev() {
            if !alive(finger) {
                debug!(node = %self.id, stale = %finger, "skipping stale finger");
                continue;
            }
            if space.in_open(finger.value(), self.id.value(), key) {
                return finger;
            }
        }
        self.id
    }

    /// Fraction of the keyspace this node is holding items for.
    pub fn load(&self, space: &KeySpace) -> f64 {
        self.store.len() as f64 / space.size() as f64
    }

    /// Number of items stored here.
    pub fn stored_len(&self) -> usize {
        self.store.len()
    }

    /// Keys of all items stored here, ascending.
    pub fn stored_keys(&self) -> Vec<u64> {
        let mut keys: Vec<u64> = self.store.iter().map(|(key, _)| key).collect();
        keys.dedup();
        keys
    }

    /// Value bytes at rest on this node.
    pub fn bytes_stored(&self) -> u64 {
        self.store.bytes_stored()
    }

    /// This node's operation counters.
    pub fn counters(&self) -> NodeCounters {
        self.counters
    }

    pub(crate) fn record_lookup(&mut self, hops: u32) {
        self.counters.lookups += 1;
        self.counters.lookup_hops += u64::from(hops);
    }

    pub(crate) fn cached_route(&self, key: u64) -> Option<NodeId> {
        self.route_cache.get(key)
    }

    pub(crate) fn cache_route(&self, key: u64, target: NodeId) {
        self.route_cache.put(key, target);
    }

    pub(crate) fn clear_route_cache(&self) {
        self.route_cache.clear();
    }

    #[cfg(test)]
    pub(crate) fn cached_route_count(&self) -> usize {
        self.route_cache.len()
    }
}
