//! The overlay: node table, routing, topology change and stabilization.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use gyre_ring::KeySpace;
use gyre_store::{IdentityCodec, ValueCodec};
use gyre_types::events::{NullSink, OpEvent, OpKind, Sink};
use gyre_types::{Key, NodeId, OverlayConfig};
use tracing::{debug, info, warn};

use crate::error::OverlayError;
use crate::node::Node;

/// Load summary for one node, as reported by [`Overlay::stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLoad {
    /// The node.
    pub id: NodeId,
    /// Items stored on it.
    pub keys: usize,
    /// Value bytes at rest on it.
    pub bytes: u64,
    /// Items stored over ring size.
    pub load: f64,
}

/// Aggregate overlay counters.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayStats {
    /// Ring exponent.
    pub m: u8,
    /// Ring size `2^m`.
    pub ring_size: u64,
    /// Live nodes.
    pub total_nodes: usize,
    /// Stored items across all nodes.
    pub total_keys: usize,
    /// Per-node load, ascending id order.
    pub node_loads: Vec<NodeLoad>,
}

/// A single-process Chord overlay.
///
/// The overlay owns every node in an id-indexed table and serializes all
/// operations: each public call runs to completion before the next begins.
/// Callers that want concurrency must serialize externally.
pub struct Overlay {
    pub(crate) space: KeySpace,
    /// Live nodes keyed by raw ring position. The `BTreeMap` range scan
    /// doubles as the ground-truth successor function over the table.
    pub(crate) nodes: BTreeMap<u64, Node>,
    /// Operation sequence number, stamped on every sink event.
    pub(crate) seq: u64,
    pub(crate) passes_cap: usize,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) codec: Arc<dyn ValueCodec>,
}

impl Overlay {
    /// Build an overlay from a configuration, linking any initial ids
    /// into a ring in sorted order with exact finger tables.
    ///
    /// All invariants hold at return. Rejects an exponent outside
    /// `[1, 32]`, ids outside the keyspace and duplicate ids, in each
    /// case without constructing anything.
    pub fn new(config: OverlayConfig) -> Result<Self, OverlayError> {
        let space = KeySpace::new(config.m)?;

        let mut ids = config.initial_ids.clone();
        ids.sort_unstable();
        for &id in &ids {
            if !space.contains(id) {
                return Err(OverlayError::IdOutOfRange {
                    id,
                    ring_size: space.size(),
                });
            }
        }
        if let Some(dup) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(OverlayError::IdConflict(NodeId::new(dup[0])));
        }

        let passes_cap = config
            .stabilization_passes_cap
            .unwrap_or(usize::from(config.m) + 2);

        let mut overlay = Self {
            space,
            nodes: BTreeMap::new(),
            seq: 0,
            passes_cap,
            sink: Arc::new(NullSink),
            codec: Arc::new(IdentityCodec),
        };
        overlay.link_initial(&ids);

        info!(m = config.m, nodes = ids.len(), "overlay created");
        overlay.seq += 1;
        overlay.sink.record(&OpEvent::new(overlay.seq, OpKind::Create));
        Ok(overlay)
    }

    /// Replace the sink events are reported to.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the value codec applied at the storage boundary.
    pub fn with_codec(mut self, codec: Arc<dyn ValueCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Link pre-validated, sorted ids into a ring with exact fingers.
    fn link_initial(&mut self, ids: &[u64]) {
        let m = self.space.exponent();
        let n = ids.len();
        for (idx, &id) in ids.iter().enumerate() {
            let successor = NodeId::new(ids[(idx + 1) % n]);
            let predecessor = NodeId::new(ids[(idx + n - 1) % n]);
            let fingers = (0..m)
                .map(|i| NodeId::new(sorted_owner(ids, self.space.finger_start(id, i))))
                .collect();
            let node = Node::restored(
                NodeId::new(id),
                successor,
                Some(predecessor),
                fingers,
                Default::default(),
            );
            self.nodes.insert(id, node);
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// The keyspace this overlay partitions.
    pub fn space(&self) -> &KeySpace {
        &self.space
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the overlay holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether a node with this id is live.
    pub fn contains_node(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Live node ids, ascending.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().map(NodeId::new).collect()
    }

    /// Read-only view of one node.
    pub fn node(&self, id: u64) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Total items stored across all nodes.
    pub fn total_keys(&self) -> usize {
        self.nodes.values().map(Node::stored_len).sum()
    }

    /// Current operation sequence number.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Aggregate counters: node count, key count, per-node load.
    pub fn stats(&self) -> OverlayStats {
        let node_loads = self
            .nodes
            .values()
            .map(|node| NodeLoad {
                id: node.id(),
                keys: node.stored_len(),
                bytes: node.bytes_stored(),
                load: node.load(&self.space),
            })
            .collect();
        OverlayStats {
            m: self.space.exponent(),
            ring_size: self.space.size(),
            total_nodes: self.nodes.len(),
            total_keys: self.total_keys(),
            node_loads,
        }
    }

    /// Ground-truth owner of `key`: the live node with the smallest id
    /// clockwise from it. `None` on an empty overlay.
    pub fn owner_of(&self, key: Key) -> Option<NodeId> {
        self.owner_of_point(key.value())
    }

    fn owner_of_point(&self, point: u64) -> Option<NodeId> {
        self.nodes
            .range(point..)
            .next()
            .or_else(|| self.nodes.iter().next())
            .map(|(&id, _)| NodeId::new(id))
    }

    /// The next table entry strictly after `id`, wrapping; `id` itself on
    /// a one-entry table.
    fn table_successor(&self, id: u64) -> NodeId {
        self.nodes
            .range((Excluded(id), Unbounded))
            .next()
            .or_else(|| self.nodes.iter().next())
            .map(|(&other, _)| NodeId::new(other))
            .unwrap_or(NodeId::new(id))
    }

    /// The previous table entry strictly before `id`, wrapping.
    fn table_predecessor(&self, id: u64) -> NodeId {
        self.nodes
            .range(..id)
            .next_back()
            .or_else(|| self.nodes.iter().next_back())
            .map(|(&other, _)| NodeId::new(other))
            .unwrap_or(NodeId::new(id))
    }

    fn first_node_id(&self) -> Result<NodeId, OverlayError> {
        self.nodes
            .keys()
            .next()
            .copied()
            .map(NodeId::new)
            .ok_or(OverlayError::NoNodes)
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Route to the node responsible for `key`, starting at `entry`.
    ///
    /// Returns the owner and the number of hops: each move to a closer
    /// preceding finger is one hop. The entry node's route cache is
    /// consulted first and refreshed on success.
    ///
    /// Routing terminates because every hop strictly shrinks the clockwise
    /// distance to the key. If stale state drives the walk past the node
    /// count, the inconsistency is reported to the sink and the owner is
    /// resolved from the table instead. Maintenance races degrade hop
    /// counts, never correctness.
    pub(crate) fn find_successor(&self, entry: NodeId, key: u64) -> (NodeId, u32) {
        if let Some(node) = self.nodes.get(&entry.value()) {
            if let Some(target) = node.cached_route(key) {
                if self.nodes.contains_key(&target.value()) {
                    return (target, 0);
                }
            }
        }

        let cap = self.nodes.len() as u32 + 1;
        let mut current = entry;
        let mut hops = 0u32;

        while let Some(node) = self.nodes.get(&current.value()) {
            let successor = node.successor();
            if self.space.in_half_open(key, node.id().value(), successor.value()) {
                self.cache_route_at(entry, key, successor);
                return (successor, hops);
            }
            let next = node.closest_preceding_finger(&self.space, key, |id| {
                self.nodes.contains_key(&id.value())
            });
            // When no finger advances (all stale or not yet fixed), walk
            // the ring through the live successor: it strictly approaches
            // the key, so the lookup stays correct, just slower, until
            // stabilization refreshes the fingers.
            let next = if next == current { successor } else { next };
            if next == current {
                self.cache_route_at(entry, key, successor);
                return (successor, hops);
            }
            current = next;
            hops += 1;
            if hops > cap {
                break;
            }
        }

        warn!(key, hops, "finger routing diverged; resolving from the table");
        let mut event = OpEvent::new(self.seq, OpKind::InvariantRepair);
        event.key = Some(Key::new(key));
        event.error = Some("routing divergence".to_string());
        self.sink.record(&event);

        (self.owner_of_point(key).unwrap_or(entry), hops)
    }

    fn cache_route_at(&self, entry: NodeId, key: u64, target: NodeId) {
        if let Some(node) = self.nodes.get(&entry.value()) {
            node.cache_route(key, target);
        }
    }

    fn clear_route_caches(&self) {
        for node in self.nodes.values() {
            node.clear_route_cache();
        }
    }

    // -----------------------------------------------------------------------
    // Topology change
    // -----------------------------------------------------------------------

    /// Add a node at `id` and fold it into the ring.
    ///
    /// The newcomer joins through an arbitrary live introducer, stabilizes
    /// first (so its successor learns its new predecessor), then one full
    /// sweep relinks the ring, the newcomer's fingers are fixed, and the
    /// keys in `(predecessor, id]` migrate from its successor. Rejections
    /// happen before any state changes.
    pub fn insert_node(&mut self, id: u64) -> Result<(), OverlayError> {
        let started = Instant::now();
        if !self.space.contains(id) {
            return Err(OverlayError::IdOutOfRange {
                id,
                ring_size: self.space.size(),
            });
        }
        if self.nodes.contains_key(&id) {
            return Err(OverlayError::IdConflict(NodeId::new(id)));
        }

        let m = self.space.exponent();
        let newcomer = NodeId::new(id);

        if self.nodes.is_empty() {
            self.nodes.insert(id, Node::singleton(newcomer, m));
            info!(node = id, "first node formed a singleton ring");
            self.record_op(OpKind::InsertNode, Some(newcomer), None, None, Some(started));
            return Ok(());
        }

        let introducer = self.first_node_id()?;
        let (successor, _) = self.find_successor(introducer, id);
        self.nodes.insert(id, Node::joining(newcomer, successor, m));

        self.stabilize_node(id);
        let ids: Vec<u64> = self.nodes.keys().copied().collect();
        for &other in &ids {
            self.stabilize_node(other);
        }
        for i in 0..m {
            self.fix_finger(id, i);
        }

        self.migrate_to_newcomer(id);
        self.clear_route_caches();

        info!(node = id, successor = %successor, "node joined the overlay");
        self.record_op(OpKind::InsertNode, Some(newcomer), None, None, Some(started));
        Ok(())
    }

    /// Move the keys the newcomer is now responsible for out of its
    /// successor, all-or-nothing within this maintenance step.
    fn migrate_to_newcomer(&mut self, id: u64) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let successor = node.successor();
        let Some(predecessor) = node.predecessor() else {
            // Links not settled; the keys stay put and the next join or
            // explicit rebalance revisits residency.
            warn!(node = id, "newcomer has no predecessor after sweep; skipping migration");
            return;
        };
        if successor.value() == id {
            return;
        }

        let space = self.space;
        let moved = match self.nodes.get_mut(&successor.value()) {
            Some(source) => source.store.drain_interval(&space, predecessor.value(), id),
            None => return,
        };
        if moved.is_empty() {
            return;
        }
        debug!(
            node = id,
            from = %successor,
            items = moved.len(),
            "migrated keys to joining node"
        );
        if let Some(target) = self.nodes.get_mut(&id) {
            target.store.absorb(moved);
        }
    }

    /// Remove the node at `id`, migrating its keys to its successor and
    /// refreshing every link and finger that pointed at it.
    pub fn remove_node(&mut self, id: u64) -> Result<(), OverlayError> {
        let started = Instant::now();
        if !self.nodes.contains_key(&id) {
            return Err(OverlayError::NodeNotFound(NodeId::new(id)));
        }
        if self.nodes.len() == 1 {
            return Err(OverlayError::LastNodeRemoval);
        }

        let leaving = NodeId::new(id);
        let successor = {
            let node = &self.nodes[&id];
            let succ = node.successor();
            if succ != leaving && self.nodes.contains_key(&succ.value()) {
                succ
            } else {
                self.table_successor(id)
            }
        };
        let predecessor = {
            let node = &self.nodes[&id];
            match node.predecessor() {
                Some(pred) if pred != leaving && self.nodes.contains_key(&pred.value()) => pred,
                _ => self.table_predecessor(id),
            }
        };

        // Keys move before the node goes away.
        let moved = match self.nodes.get_mut(&id) {
            Some(node) => node.store.drain_all(),
            None => Vec::new(),
        };
        let moved_count = moved.len();
        if let Some(target) = self.nodes.get_mut(&successor.value()) {
            target.store.absorb(moved);
        }

        // Relink the neighbours, then drop the node from the table.
        if let Some(node) = self.nodes.get_mut(&predecessor.value()) {
            node.set_successor(successor);
        }
        if let Some(node) = self.nodes.get_mut(&successor.value()) {
            node.set_predecessor(Some(predecessor));
        }
        self.nodes.remove(&id);

        // Any remaining reference to the departed node is refreshed:
        // successors collapse onto its successor, stray predecessors are
        // cleared for the next sweep, fingers are re-routed.
        let ids: Vec<u64> = self.nodes.keys().copied().collect();
        for &other in &ids {
            let node = &self.nodes[&other];
            if node.successor() == leaving {
                if let Some(node) = self.nodes.get_mut(&other) {
                    node.set_successor(successor);
                }
            }
            let node = &self.nodes[&other];
            if node.predecessor() == Some(leaving) {
                if let Some(node) = self.nodes.get_mut(&other) {
                    node.set_predecessor(None);
                }
            }
            let stale: Vec<u8> = (0..self.space.exponent())
                .filter(|&i| self.nodes[&other].finger(i) == leaving)
                .collect();
            for i in stale {
                self.fix_finger(other, i);
            }
        }

        self.clear_route_caches();

        info!(
            node = id,
            to = %successor,
            items = moved_count,
            "node left the overlay"
        );
        self.record_op(OpKind::RemoveNode, Some(leaving), None, None, Some(started));
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Stabilization
    // -----------------------------------------------------------------------

    /// One stabilization step for a single node. Returns the number of
    /// link mutations performed.
    fn stabilize_node(&mut self, id: u64) -> usize {
        let me = NodeId::new(id);
        let mut mutations = 0;

        let Some(successor) = self.nodes.get(&id).map(Node::successor) else {
            return 0;
        };

        // A successor that left the table is repaired from the table.
        let successor = if self.nodes.contains_key(&successor.value()) {
            successor
        } else {
            let repaired = self.table_successor(id);
            warn!(node = id, stale = %successor, "successor gone; repaired from table");
            self.record_repair(Some(me), "stale successor link");
            if let Some(node) = self.nodes.get_mut(&id) {
                node.set_successor(repaired);
            }
            mutations += 1;
            repaired
        };

        // Adopt the successor's predecessor when it sits between us.
        if let Some(between) = self.nodes.get(&successor.value()).and_then(Node::predecessor) {
            if self.nodes.contains_key(&between.value())
                && self.space.in_open(between.value(), id, successor.value())
            {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.set_successor(between);
                }
                mutations += 1;
            }
        }

        // Notify the (possibly new) successor that we think we precede it.
        let Some(successor) = self.nodes.get(&id).map(Node::successor) else {
            return mutations;
        };
        let accepted = match self.nodes.get(&successor.value()).map(Node::predecessor) {
            None => false,
            Some(None) => true,
            Some(Some(prior)) => {
                !self.nodes.contains_key(&prior.value())
                    || self.space.in_open(id, prior.value(), successor.value())
            }
        };
        if accepted {
            if let Some(node) = self.nodes.get_mut(&successor.value()) {
                if node.predecessor() != Some(me) {
                    node.set_predecessor(Some(me));
                    mutations += 1;
                }
            }
        }

        mutations
    }

    /// Refresh one finger entry by routing to its start position. Returns
    /// 1 when the entry changed.
    fn fix_finger(&mut self, id: u64, i: u8) -> usize {
        let start = self.space.finger_start(id, i);
        let (owner, _) = self.find_successor(NodeId::new(id), start);
        let Some(node) = self.nodes.get_mut(&id) else {
            return 0;
        };
        if node.finger(i) != owner {
            node.set_finger(i, owner);
            1
        } else {
            0
        }
    }

    /// One full maintenance pass: stabilize every node, then fix every
    /// finger of every node. Returns the number of mutations performed;
    /// zero means the overlay was already quiescent.
    pub fn stabilize_all(&mut self) -> usize {
        let ids: Vec<u64> = self.nodes.keys().copied().collect();
        let mut mutations = 0;
        for &id in &ids {
            mutations += self.stabilize_node(id);
        }
        for &id in &ids {
            for i in 0..self.space.exponent() {
                mutations += self.fix_finger(id, i);
            }
        }
        debug!(mutations, "stabilization pass complete");
        self.record_op(OpKind::StabilizePass, None, None, None, None);
        mutations
    }

    /// Run stabilization passes until one of them mutates nothing.
    ///
    /// Returns the number of passes used (at least one: the quiescence
    /// check is itself a pass). Errors with `RebalanceDivergence` when the
    /// configured cap is exhausted while mutations keep happening.
    pub fn rebalance(&mut self) -> Result<usize, OverlayError> {
        let started = Instant::now();
        for pass in 1..=self.passes_cap {
            if self.stabilize_all() == 0 {
                debug!(passes = pass, "overlay quiescent");
                self.record_op(OpKind::Rebalance, None, None, None, Some(started));
                return Ok(pass);
            }
        }
        warn!(cap = self.passes_cap, "stabilization did not converge");
        self.seq += 1;
        let mut event = OpEvent::new(self.seq, OpKind::Rebalance);
        event.elapsed = Some(started.elapsed());
        event.error = Some("divergence".to_string());
        self.sink.record(&event);
        Err(OverlayError::RebalanceDivergence {
            passes: self.passes_cap,
        })
    }

    // -----------------------------------------------------------------------
    // Data operations
    // -----------------------------------------------------------------------

    /// Store `value` under `name` at the owner of `H(name)`. Overwrites a
    /// previous value with the same name. Returns the owner's id.
    pub fn put(&mut self, name: &str, value: Bytes) -> Result<NodeId, OverlayError> {
        let started = Instant::now();
        let entry = self.first_node_id()?;
        let key = self.space.hash(name.as_bytes());
        let (owner, hops) = self.find_successor(entry, key);

        let wrapped = self.codec.wrap(value);
        let Some(node) = self.nodes.get_mut(&owner.value()) else {
            return Err(OverlayError::NodeNotFound(owner));
        };
        node.store.insert(key, name, wrapped);

        debug!(name, key, owner = %owner, "stored item");
        self.record_op(
            OpKind::Put,
            Some(owner),
            Some(Key::new(key)),
            Some(hops),
            Some(started),
        );
        Ok(owner)
    }

    /// Look `name` up, entering the overlay at its lowest-id node.
    pub fn lookup(&mut self, name: &str) -> Result<Bytes, OverlayError> {
        let entry = self.first_node_id()?;
        self.lookup_from(entry.value(), name)
    }

    /// Look `name` up, entering the overlay at the node `entry`.
    ///
    /// Routes `H(name)` to its owner, fetches by name there, and records
    /// the hop count against the entry node and the sink.
    pub fn lookup_from(&mut self, entry: u64, name: &str) -> Result<Bytes, OverlayError> {
        let started = Instant::now();
        if !self.nodes.contains_key(&entry) {
            return Err(OverlayError::NodeNotFound(NodeId::new(entry)));
        }
        let key = self.space.hash(name.as_bytes());
        let (owner, hops) = self.find_successor(NodeId::new(entry), key);

        if let Some(node) = self.nodes.get_mut(&entry) {
            node.record_lookup(hops);
        }

        let value = self
            .nodes
            .get(&owner.value())
            .and_then(|node| node.store.get(key, name))
            .cloned();

        self.seq += 1;
        let mut event = OpEvent::new(self.seq, OpKind::Lookup);
        event.node = Some(owner);
        event.key = Some(Key::new(key));
        event.hops = Some(hops);
        event.elapsed = Some(started.elapsed());

        match value {
            Some(wrapped) => {
                self.sink.record(&event);
                Ok(self.codec.unwrap(wrapped))
            }
            None => {
                event.error = Some("not found".to_string());
                self.sink.record(&event);
                Err(OverlayError::NameNotFound(name.to_string()))
            }
        }
    }

    /// Remove the item stored under `name`.
    pub fn delete(&mut self, name: &str) -> Result<(), OverlayError> {
        let started = Instant::now();
        let entry = self.first_node_id()?;
        let key = self.space.hash(name.as_bytes());
        let (owner, hops) = self.find_successor(entry, key);

        let removed = self
            .nodes
            .get_mut(&owner.value())
            .and_then(|node| node.store.remove(key, name));

        self.seq += 1;
        let mut event = OpEvent::new(self.seq, OpKind::Delete);
        event.node = Some(owner);
        event.key = Some(Key::new(key));
        event.hops = Some(hops);
        event.elapsed = Some(started.elapsed());

        match removed {
            Some(_) => {
                debug!(name, key, owner = %owner, "deleted item");
                self.sink.record(&event);
                Ok(())
            }
            None => {
                event.error = Some("not found".to_string());
                self.sink.record(&event);
                Err(OverlayError::NameNotFound(name.to_string()))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Event plumbing
    // -----------------------------------------------------------------------

    fn record_op(
        &mut self,
        kind: OpKind,
        node: Option<NodeId>,
        key: Option<Key>,
        hops: Option<u32>,
        started: Option<Instant>,
    ) {
        self.seq += 1;
        let mut event = OpEvent::new(self.seq, kind);
        event.node = node;
        event.key = key;
        event.hops = hops;
        event.elapsed = started.map(|s| s.elapsed());
        self.sink.record(&event);
    }

    pub(crate) fn record_repair(&self, node: Option<NodeId>, reason: &str) {
        let mut event = OpEvent::new(self.seq, OpKind::InvariantRepair);
        event.node = node;
        event.error = Some(reason.to_string());
        self.sink.record(&event);
    }
}

impl std::fmt::Debug for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Overlay")
            .field("m", &self.space.exponent())
            .field("nodes", &self.nodes.len())
            .field("keys", &self.total_keys())
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// Owner of `point` within a sorted id slice: first id at or after it,
/// wrapping to the smallest.
fn sorted_owner(ids: &[u64], point: u64) -> u64 {
    match ids.binary_search(&point) {
        Ok(idx) => ids[idx],
        Err(idx) if idx == ids.len() => ids[0],
        Err(idx) => ids[idx],
    }
}
