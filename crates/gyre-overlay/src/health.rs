//! Invariant verification.
//!
//! `health_check` inspects the overlay without mutating it and reports
//! violations grouped by invariant class: neighbor-link symmetry, the
//! single successor cycle, finger targets (on a sample), and key
//! residency. Ordinary operations never surface these (they are repaired
//! by stabilization), but a health report makes them visible, and restore
//! uses it as its acceptance gate.

use std::collections::HashSet;

use gyre_types::events::{OpEvent, OpKind};
use rand::seq::IteratorRandom;
use tracing::debug;

use crate::overlay::Overlay;

/// How many finger entries `health_check` verifies at most. When the
/// overlay has no more than this many entries in total, all of them are
/// checked exhaustively.
const FINGER_SAMPLE_MAX: usize = 64;

/// Violation counts grouped by invariant class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Nodes inspected.
    pub nodes_checked: usize,
    /// Successor/predecessor symmetry failures, including dangling links.
    pub link_violations: usize,
    /// Failures of the single-cycle property of the successor relation.
    pub cycle_violations: usize,
    /// Finger entries that disagree with the true owner of their start.
    pub finger_violations: usize,
    /// Finger entries inspected.
    pub fingers_sampled: usize,
    /// Items not resident on the successor of their re-hashed name.
    pub residency_violations: usize,
    /// Items inspected.
    pub keys_checked: usize,
}

impl HealthReport {
    /// Total violations across all classes.
    pub fn total_violations(&self) -> usize {
        self.link_violations
            + self.cycle_violations
            + self.finger_violations
            + self.residency_violations
    }

    /// Whether no violation was found.
    pub fn is_clean(&self) -> bool {
        self.total_violations() == 0
    }
}

impl Overlay {
    /// Verify the overlay's invariants and report violations by class.
    pub fn health_check(&self) -> HealthReport {
        let mut report = HealthReport {
            nodes_checked: self.nodes.len(),
            ..HealthReport::default()
        };
        if self.nodes.is_empty() {
            self.record_health(&report);
            return report;
        }

        self.check_links(&mut report);
        self.check_cycle(&mut report);
        self.check_fingers(&mut report);
        self.check_residency(&mut report);

        debug!(
            violations = report.total_violations(),
            nodes = report.nodes_checked,
            "health check complete"
        );
        self.record_health(&report);
        report
    }

    /// I1: every node's successor must name it as predecessor, and every
    /// link must reference a live node.
    fn check_links(&self, report: &mut HealthReport) {
        for node in self.nodes.values() {
            match self.nodes.get(&node.successor().value()) {
                Some(successor) => {
                    if successor.predecessor() != Some(node.id()) {
                        report.link_violations += 1;
                    }
                }
                None => report.link_violations += 1,
            }
            if let Some(predecessor) = node.predecessor() {
                if !self.nodes.contains_key(&predecessor.value()) {
                    report.link_violations += 1;
                }
            } else {
                // A settled overlay has no absent predecessors.
                report.link_violations += 1;
            }
        }
    }

    /// I5: walking successors from any node must visit every live node
    /// exactly once and come back to the start.
    fn check_cycle(&self, report: &mut HealthReport) {
        let Some(&start) = self.nodes.keys().next() else {
            return;
        };
        let mut seen = HashSet::with_capacity(self.nodes.len());
        let mut current = start;
        for _ in 0..self.nodes.len() {
            if !seen.insert(current) {
                // Re-entered a node before covering the ring.
                report.cycle_violations += 1;
                return;
            }
            match self.nodes.get(&current) {
                Some(node) => current = node.successor().value(),
                None => {
                    report.cycle_violations += 1;
                    return;
                }
            }
        }
        if current != start || seen.len() != self.nodes.len() {
            report.cycle_violations += 1;
        }
    }

    /// I3 on a sample: `finger[i]` must own `(id + 2^i) mod R`. Small
    /// overlays are checked exhaustively.
    fn check_fingers(&self, report: &mut HealthReport) {
        let m = self.space.exponent();
        let ids: Vec<u64> = self.nodes.keys().copied().collect();
        let total = ids.len() * usize::from(m);

        let sample: Vec<usize> = if total <= FINGER_SAMPLE_MAX {
            (0..total).collect()
        } else {
            let mut rng = rand::rng();
            (0..total).choose_multiple(&mut rng, FINGER_SAMPLE_MAX)
        };

        for index in sample {
            let id = ids[index / usize::from(m)];
            let i = (index % usize::from(m)) as u8;
            let start = self.space.finger_start(id, i);
            let expected = self.owner_of_raw(start);
            let actual = self.nodes[&id].finger(i);
            report.fingers_sampled += 1;
            if Some(actual) != expected {
                report.finger_violations += 1;
            }
        }
    }

    /// I4: every stored item must live on the successor of its re-hashed
    /// name, under the key that hash produces.
    fn check_residency(&self, report: &mut HealthReport) {
        for node in self.nodes.values() {
            for (key, item) in node.store.iter() {
                report.keys_checked += 1;
                let rehashed = self.space.hash(item.name.as_bytes());
                if rehashed != key {
                    report.residency_violations += 1;
                    continue;
                }
                if self.owner_of_raw(rehashed) != Some(node.id()) {
                    report.residency_violations += 1;
                }
            }
        }
    }

    fn owner_of_raw(&self, point: u64) -> Option<gyre_types::NodeId> {
        self.owner_of(gyre_types::Key::new(point))
    }

    fn record_health(&self, report: &HealthReport) {
        let mut event = OpEvent::new(self.seq, OpKind::HealthCheck);
        if !report.is_clean() {
            event.error = Some(format!("{} violations", report.total_violations()));
        }
        self.sink.record(&event);
    }
}
