//! Churn suites: randomized join/leave storms with data verification.
//!
//! Seeded generators keep every storm reproducible.

use gyre_integration_tests::{
    assert_all_retrievable, overlay_with, pick, put_all, random_distinct_ids, seeded_names,
    value_for,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Random joins and leaves, verifying data and invariants after every
/// convergence point.
#[test]
fn test_churn_storm_preserves_data_and_invariants() {
    for seed in [101u64, 202, 303] {
        let mut rng = StdRng::seed_from_u64(seed);
        let m = 8;
        let ring_size = 1u64 << m;
        let mut overlay = overlay_with(m, &random_distinct_ids(m, 8, &mut rng));
        let names = seeded_names(50, seed);
        put_all(&mut overlay, &names);

        for round in 0..30 {
            if rng.random_bool(0.5) || overlay.len() <= 3 {
                loop {
                    let id = rng.random_range(0..ring_size);
                    if !overlay.contains_node(id) {
                        overlay.insert_node(id).unwrap();
                        break;
                    }
                }
            } else {
                let ids = overlay.node_ids();
                let victim = pick(&ids, &mut rng).value();
                overlay.remove_node(victim).unwrap();
            }

            assert_all_retrievable(&mut overlay, &names);

            if round % 5 == 4 {
                overlay.rebalance().unwrap_or_else(|err| {
                    panic!("seed {seed} round {round}: rebalance failed: {err}")
                });
                let report = overlay.health_check();
                assert!(
                    report.is_clean(),
                    "seed {seed} round {round}: {report:?}"
                );
            }
        }
    }
}

/// Writes interleaved with topology changes: every value written before
/// or during the churn is retrievable afterwards.
#[test]
fn test_interleaved_writes_and_churn() {
    let mut rng = StdRng::seed_from_u64(909);
    let m = 8;
    let ring_size = 1u64 << m;
    let mut overlay = overlay_with(m, &random_distinct_ids(m, 6, &mut rng));

    let names = seeded_names(60, 909);
    let mut written: Vec<String> = Vec::new();

    for (i, name) in names.iter().enumerate() {
        overlay.put(name, value_for(name)).unwrap();
        written.push(name.clone());

        match i % 4 {
            0 => loop {
                let id = rng.random_range(0..ring_size);
                if !overlay.contains_node(id) {
                    overlay.insert_node(id).unwrap();
                    break;
                }
            },
            2 if overlay.len() > 3 => {
                let ids = overlay.node_ids();
                let victim = pick(&ids, &mut rng).value();
                overlay.remove_node(victim).unwrap();
            }
            _ => {}
        }
    }

    assert_all_retrievable(&mut overlay, &written);
    overlay.rebalance().unwrap();
    assert!(overlay.health_check().is_clean());
    assert_eq!(overlay.total_keys(), written.len());
}

/// Deleting under churn: deleted names stay gone, surviving names stay
/// retrievable.
#[test]
fn test_deletes_survive_churn() {
    let mut rng = StdRng::seed_from_u64(1313);
    let m = 7;
    let ring_size = 1u64 << m;
    let mut overlay = overlay_with(m, &random_distinct_ids(m, 6, &mut rng));

    let names = seeded_names(40, 1313);
    put_all(&mut overlay, &names);

    let (deleted, kept) = names.split_at(15);
    for name in deleted {
        overlay.delete(name).unwrap();
    }

    for _ in 0..10 {
        loop {
            let id = rng.random_range(0..ring_size);
            if !overlay.contains_node(id) {
                overlay.insert_node(id).unwrap();
                break;
            }
        }
    }

    for name in deleted {
        assert!(
            overlay.lookup(name).is_err(),
            "{name} reappeared after churn"
        );
    }
    assert_all_retrievable(&mut overlay, &kept.to_vec());
    assert_eq!(overlay.total_keys(), kept.len());
}
