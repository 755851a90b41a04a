//! Shared test harness for Gyre integration tests.
//!
//! Builders for overlays with known shapes, deterministic name/value
//! generators, and ring-walk helpers used by the property suites.

use bytes::Bytes;
use gyre_overlay::Overlay;
use gyre_types::OverlayConfig;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

/// An overlay over `[0, 2^m)` with the given initial ids.
pub fn overlay_with(m: u8, ids: &[u64]) -> Overlay {
    Overlay::new(OverlayConfig::with_exponent(m).initial_ids(ids.to_vec()))
        .expect("valid test overlay config")
}

/// `n` node ids spread evenly over a `2^m` ring.
pub fn spread_ids(m: u8, n: u64) -> Vec<u64> {
    let step = (1u64 << m) / n;
    (0..n).map(|i| i * step).collect()
}

/// Smallest name of the form `item-N` hashing to `target` on this
/// overlay's ring. Deterministic, so scenario tests can pin exact keys.
pub fn name_for_key(overlay: &Overlay, target: u64) -> String {
    for i in 0..1_000_000u64 {
        let name = format!("item-{i}");
        if overlay.space().hash(name.as_bytes()) == target {
            return name;
        }
    }
    panic!("no name found hashing to {target}");
}

/// `count` distinct deterministic names derived from a seed.
pub fn seeded_names(count: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| format!("obj-{seed}-{i}-{:08x}", rng.random::<u32>()))
        .collect()
}

/// The canonical test value for a name.
pub fn value_for(name: &str) -> Bytes {
    Bytes::from(format!("value-of-{name}"))
}

/// Store every name with its canonical value.
pub fn put_all(overlay: &mut Overlay, names: &[String]) {
    for name in names {
        overlay.put(name, value_for(name)).expect("put");
    }
}

/// Assert every name still resolves to its canonical value.
pub fn assert_all_retrievable(overlay: &mut Overlay, names: &[String]) {
    for name in names {
        let value = overlay
            .lookup(name)
            .unwrap_or_else(|err| panic!("lookup of {name} failed: {err}"));
        assert_eq!(value, value_for(name), "wrong value for {name}");
    }
}

/// Follow successor links from the lowest-id node until the walk returns
/// to its start or exceeds the node count.
pub fn walk_ring(overlay: &Overlay) -> Vec<u64> {
    let ids = overlay.node_ids();
    let Some(&start) = ids.first() else {
        return Vec::new();
    };
    let mut walk = Vec::with_capacity(ids.len());
    let mut current = start.value();
    for _ in 0..ids.len() {
        walk.push(current);
        current = overlay
            .node(current)
            .expect("walk reached a missing node")
            .successor()
            .value();
        if current == start.value() {
            break;
        }
    }
    walk
}

/// `count` distinct ids in `[0, 2^m)`, drawn with a seeded generator.
pub fn random_distinct_ids(m: u8, count: usize, rng: &mut StdRng) -> Vec<u64> {
    let ring_size = 1u64 << m;
    assert!(count as u64 <= ring_size, "more ids than ring positions");
    let mut ids = std::collections::BTreeSet::new();
    while ids.len() < count {
        ids.insert(rng.random_range(0..ring_size));
    }
    ids.into_iter().collect()
}

/// Pick one element of a slice with a seeded generator.
pub fn pick<'a, T>(items: &'a [T], rng: &mut StdRng) -> &'a T {
    items.choose(rng).expect("non-empty slice")
}
