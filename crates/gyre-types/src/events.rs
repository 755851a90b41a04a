//! Observation layer: operation events and the [`Sink`] they flow into.
//!
//! The overlay reports every operation it performs as an [`OpEvent`]. A
//! [`Sink`] is a passive observer: it may discard events ([`NullSink`]),
//! aggregate them into counters ([`CounterSink`]), or forward them to a
//! metrics endpoint. A sink is never allowed to block or fail observably;
//! implementations swallow their own errors.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::{Key, NodeId};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Kind of overlay operation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    /// Overlay construction.
    Create,
    /// A node joined the overlay.
    InsertNode,
    /// A node left the overlay.
    RemoveNode,
    /// An item was stored.
    Put,
    /// An item was looked up by name.
    Lookup,
    /// An item was explicitly deleted.
    Delete,
    /// One full stabilization pass ran.
    StabilizePass,
    /// Repeated stabilization until quiescence.
    Rebalance,
    /// A state snapshot was taken.
    Snapshot,
    /// Overlay state was restored from a snapshot.
    Restore,
    /// Invariants were verified.
    HealthCheck,
    /// An internal inconsistency was observed during routing or
    /// maintenance. Repaired by the next stabilization sweep; never
    /// surfaced to callers.
    InvariantRepair,
}

impl OpKind {
    /// Stable lower-case label, usable as a metric name component.
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Create => "create",
            OpKind::InsertNode => "insert_node",
            OpKind::RemoveNode => "remove_node",
            OpKind::Put => "put",
            OpKind::Lookup => "lookup",
            OpKind::Delete => "delete",
            OpKind::StabilizePass => "stabilize_pass",
            OpKind::Rebalance => "rebalance",
            OpKind::Snapshot => "snapshot",
            OpKind::Restore => "restore",
            OpKind::HealthCheck => "health_check",
            OpKind::InvariantRepair => "invariant_repair",
        }
    }
}

/// One overlay operation, as reported to a [`Sink`].
#[derive(Debug, Clone)]
pub struct OpEvent {
    /// Overlay operation sequence number (monotonically increasing).
    pub seq: u64,
    /// What happened.
    pub kind: OpKind,
    /// The node the operation acted on or entered at, if any.
    pub node: Option<NodeId>,
    /// The key involved, if any.
    pub key: Option<Key>,
    /// Routing hops taken, for operations that route.
    pub hops: Option<u32>,
    /// Wall-clock duration, when measured.
    pub elapsed: Option<Duration>,
    /// Error tag, when the operation failed or observed an inconsistency.
    pub error: Option<String>,
}

impl OpEvent {
    /// An event with only the sequence number and kind set.
    pub fn new(seq: u64, kind: OpKind) -> Self {
        Self {
            seq,
            kind,
            node: None,
            key: None,
            hops: None,
            elapsed: None,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// Passive observer of overlay operations.
///
/// `record` must not block and must not fail observably; a misbehaving
/// implementation can only hurt itself.
pub trait Sink: Send + Sync {
    /// Observe one operation.
    fn record(&self, event: &OpEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl Sink for NullSink {
    fn record(&self, _event: &OpEvent) {}
}

// ---------------------------------------------------------------------------
// CounterSink
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
struct CounterInner {
    operations: BTreeMap<OpKind, u64>,
    lookups: u64,
    lookup_hops: u64,
    errors: u64,
    node_ops: BTreeMap<NodeId, u64>,
}

/// Aggregated view of everything a [`CounterSink`] has observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterTotals {
    /// Operation count per kind.
    pub operations: BTreeMap<OpKind, u64>,
    /// Total lookups observed.
    pub lookups: u64,
    /// Sum of hop counts over all lookups.
    pub lookup_hops: u64,
    /// Events that carried an error tag.
    pub errors: u64,
    /// Operations per involved node.
    pub node_ops: BTreeMap<NodeId, u64>,
}

impl CounterTotals {
    /// Count for one operation kind.
    pub fn operations_total(&self, kind: OpKind) -> u64 {
        self.operations.get(&kind).copied().unwrap_or(0)
    }

    /// Mean hops per lookup, `0.0` when no lookups were observed.
    pub fn mean_lookup_hops(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.lookup_hops as f64 / self.lookups as f64
        }
    }
}

/// Sink that aggregates events into in-memory counters.
///
/// Shareable across the overlay and the caller; a poisoned lock makes the
/// sink drop events rather than propagate a panic.
#[derive(Debug, Default)]
pub struct CounterSink {
    inner: Mutex<CounterInner>,
}

impl CounterSink {
    /// A sink with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current totals.
    pub fn totals(&self) -> CounterTotals {
        let Ok(inner) = self.inner.lock() else {
            return CounterTotals::default();
        };
        CounterTotals {
            operations: inner.operations.clone(),
            lookups: inner.lookups,
            lookup_hops: inner.lookup_hops,
            errors: inner.errors,
            node_ops: inner.node_ops.clone(),
        }
    }
}

impl Sink for CounterSink {
    fn record(&self, event: &OpEvent) {
        // Swallow lock poisoning: the sink must never fail observably.
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        *inner.operations.entry(event.kind).or_insert(0) += 1;
        if event.kind == OpKind::Lookup {
            inner.lookups += 1;
            inner.lookup_hops += u64::from(event.hops.unwrap_or(0));
        }
        if event.error.is_some() {
            inner.errors += 1;
        }
        if let Some(node) = event.node {
            *inner.node_ops.entry(node).or_insert(0) += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
