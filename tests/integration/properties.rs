//! Property suites: quantified invariants over randomized overlays.
//!
//! Each property runs over seeded randomized topologies so failures
//! reproduce exactly.

use gyre_integration_tests::{
    assert_all_retrievable, name_for_key, overlay_with, put_all, random_distinct_ids, seeded_names,
    spread_ids, value_for, walk_ring,
};
use gyre_types::Key;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// P1: for any sequence of valid inserts and removes, walking successors
/// from any node visits exactly N distinct ids and returns to start.
#[test]
fn test_ring_closure_under_churn() {
    let mut rng = StdRng::seed_from_u64(11);
    let m = 7;
    let initial = random_distinct_ids(m, 6, &mut rng);
    let mut overlay = overlay_with(m, &initial);

    for step in 0..40 {
        let ring_size = 1u64 << m;
        if rng.random_bool(0.6) || overlay.len() <= 2 {
            // Insert a fresh id.
            loop {
                let id = rng.random_range(0..ring_size);
                if !overlay.contains_node(id) {
                    overlay.insert_node(id).unwrap();
                    break;
                }
            }
        } else {
            let ids = overlay.node_ids();
            let victim = ids[rng.random_range(0..ids.len())];
            overlay.remove_node(victim.value()).unwrap();
        }

        let walk = walk_ring(&overlay);
        assert_eq!(
            walk.len(),
            overlay.len(),
            "step {step}: ring walk covered {} of {} nodes",
            walk.len(),
            overlay.len()
        );
        let distinct: std::collections::HashSet<&u64> = walk.iter().collect();
        assert_eq!(distinct.len(), walk.len(), "step {step}: walk revisited a node");
    }
}

/// P2: after stabilization converges, every finger entry equals the true
/// owner of its start position.
#[test]
fn test_finger_correctness_after_convergence() {
    let mut rng = StdRng::seed_from_u64(23);
    let m = 8;
    let mut overlay = overlay_with(m, &random_distinct_ids(m, 10, &mut rng));

    for id in random_distinct_ids(m, 6, &mut StdRng::seed_from_u64(24)) {
        if !overlay.contains_node(id) {
            overlay.insert_node(id).unwrap();
        }
    }
    overlay.rebalance().unwrap();

    let space = *overlay.space();
    for node_id in overlay.node_ids() {
        let node = overlay.node(node_id.value()).unwrap();
        for i in 0..m {
            let start = space.finger_start(node_id.value(), i);
            let expected = overlay.owner_of(Key::new(start)).unwrap();
            assert_eq!(
                node.finger(i),
                expected,
                "node {node_id} finger {i} (start {start})"
            );
        }
    }
}

/// P3: every stored name lives on the successor of its hash.
#[test]
fn test_key_residency() {
    let mut overlay = overlay_with(8, &spread_ids(8, 12));
    let names = seeded_names(60, 31);
    put_all(&mut overlay, &names);

    for name in &names {
        let key = overlay.space().hash(name.as_bytes());
        let owner = overlay.owner_of(Key::new(key)).unwrap();
        let holder = overlay.node(owner.value()).unwrap();
        assert!(
            holder.stored_keys().contains(&key),
            "{name} (key {key}) missing from its owner {owner}"
        );
    }

    let report = overlay.health_check();
    assert_eq!(report.residency_violations, 0, "report: {report:?}");
}

/// P4: lookups return the stored value regardless of entry point.
#[test]
fn test_lookup_correct_from_every_entry() {
    let mut overlay = overlay_with(7, &spread_ids(7, 9));
    let names = seeded_names(25, 47);
    put_all(&mut overlay, &names);

    let entries: Vec<u64> = overlay.node_ids().iter().map(|id| id.value()).collect();
    for name in &names {
        for &entry in &entries {
            let value = overlay.lookup_from(entry, name).unwrap();
            assert_eq!(value, value_for(name), "{name} from entry {entry}");
        }
    }
}

/// P5: on a converged overlay, every lookup takes at most `m` hops.
#[test]
fn test_hop_bound() {
    let m = 6;
    let ids: Vec<u64> = (0..32).collect();
    let mut overlay = overlay_with(m, &ids);
    let names = seeded_names(200, 59);
    put_all(&mut overlay, &names);

    // Enter away from the put entry point so routing actually runs.
    for name in &names {
        let before = overlay.node(1).unwrap().counters().lookup_hops;
        overlay.lookup_from(1, name).unwrap();
        let hops = overlay.node(1).unwrap().counters().lookup_hops - before;
        assert!(hops <= u64::from(m), "{name} took {hops} hops, bound is {m}");
    }
}

/// P6: snapshot/restore round-trips structure exactly: same ids, links,
/// fingers and stores.
#[test]
fn test_snapshot_roundtrip_structural_equality() {
    for seed in [3u64, 17, 92] {
        let mut rng = StdRng::seed_from_u64(seed);
        let m = 7;
        let mut overlay = overlay_with(m, &random_distinct_ids(m, 8, &mut rng));
        let names = seeded_names(30, seed);
        put_all(&mut overlay, &names);

        let doc = overlay.snapshot();

        // The document survives an actual serializer round-trip.
        let encoded = postcard::to_allocvec(&doc).unwrap();
        let decoded: gyre_overlay::SnapshotDocument = postcard::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, doc, "seed {seed}: postcard round-trip changed the document");

        let restored = gyre_overlay::Overlay::from_snapshot(&decoded).unwrap();
        assert_eq!(
            restored.snapshot().nodes,
            doc.nodes,
            "seed {seed}: restored overlay differs structurally"
        );
        assert!(restored.health_check().is_clean(), "seed {seed}");
    }
}

/// P7: a join never loses data.
#[test]
fn test_join_preserves_data() {
    for seed in [5u64, 41, 77] {
        let mut rng = StdRng::seed_from_u64(seed);
        let m = 7;
        let mut overlay = overlay_with(m, &random_distinct_ids(m, 5, &mut rng));
        let names = seeded_names(40, seed);
        put_all(&mut overlay, &names);

        for _ in 0..4 {
            let ring_size = 1u64 << m;
            loop {
                let id = rng.random_range(0..ring_size);
                if !overlay.contains_node(id) {
                    overlay.insert_node(id).unwrap();
                    break;
                }
            }
            assert_all_retrievable(&mut overlay, &names);
        }
    }
}

/// P8: a leave never loses data.
#[test]
fn test_leave_preserves_data() {
    for seed in [7u64, 29, 63] {
        let mut rng = StdRng::seed_from_u64(seed);
        let m = 7;
        let mut overlay = overlay_with(m, &random_distinct_ids(m, 8, &mut rng));
        let names = seeded_names(40, seed);
        put_all(&mut overlay, &names);

        while overlay.len() > 1 {
            let ids = overlay.node_ids();
            let victim = ids[rng.random_range(0..ids.len())];
            overlay.remove_node(victim.value()).unwrap();
            assert_all_retrievable(&mut overlay, &names);
        }
        assert_eq!(
            overlay.total_keys(),
            overlay.node(overlay.node_ids()[0].value()).unwrap().stored_len(),
            "all keys collapse onto the survivor"
        );
    }
}

/// The exact key targeted by `name_for_key` really hashes there; the
/// scenario suites rely on it.
#[test]
fn test_name_for_key_pins_hashes() {
    let overlay = overlay_with(3, &[0]);
    for target in 0..8 {
        let name = name_for_key(&overlay, target);
        assert_eq!(overlay.space().hash(name.as_bytes()), target);
    }
}
