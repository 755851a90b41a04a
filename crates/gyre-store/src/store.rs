//! The map each overlay node keeps from ring keys to named items.

use std::collections::BTreeMap;

use bytes::Bytes;
use gyre_ring::KeySpace;
use tracing::debug;

/// One stored item: the name it was stored under plus its (possibly
/// wrapped) value.
///
/// The key is kept by the surrounding map, the name inside the item, so a
/// lookup by name needs no re-hashing. Distinct names may truncate to the
/// same key; residency and overwrite are per-name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredItem {
    /// The name the item was stored under.
    pub name: String,
    /// The value, in at-rest (wrapped) form.
    pub value: Bytes,
}

/// Key-to-items map owned by a single overlay node.
///
/// Backed by a `BTreeMap` so iteration (snapshots, health scans, graph
/// export) is deterministic. Value bytes are accounted incrementally.
#[derive(Debug, Default, Clone)]
pub struct NodeStore {
    items: BTreeMap<u64, Vec<StoredItem>>,
    bytes_stored: u64,
}

impl NodeStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the item named `name` under `key`.
    ///
    /// Returns the previous value when the name was already present.
    pub fn insert(&mut self, key: u64, name: &str, value: Bytes) -> Option<Bytes> {
        self.bytes_stored += value.len() as u64;
        let bucket = self.items.entry(key).or_default();
        if let Some(existing) = bucket.iter_mut().find(|item| item.name == name) {
            let old = std::mem::replace(&mut existing.value, value);
            self.bytes_stored -= old.len() as u64;
            debug!(key, name, "overwrote stored item");
            return Some(old);
        }
        bucket.push(StoredItem {
            name: name.to_string(),
            value,
        });
        None
    }

    /// Value stored under `key` for `name`, if present.
    pub fn get(&self, key: u64, name: &str) -> Option<&Bytes> {
        self.items
            .get(&key)?
            .iter()
            .find(|item| item.name == name)
            .map(|item| &item.value)
    }

    /// Remove the item named `name` under `key`, returning its value.
    pub fn remove(&mut self, key: u64, name: &str) -> Option<Bytes> {
        let bucket = self.items.get_mut(&key)?;
        let pos = bucket.iter().position(|item| item.name == name)?;
        let item = bucket.remove(pos);
        if bucket.is_empty() {
            self.items.remove(&key);
        }
        self.bytes_stored -= item.value.len() as u64;
        Some(item.value)
    }

    /// Drain every item whose key lies in the half-open ring interval
    /// `(from, to]`, for migration to another node.
    ///
    /// The caller observes this as all-or-nothing: the returned entries
    /// are no longer present here and carry everything needed to absorb
    /// them elsewhere.
    pub fn drain_interval(
        &mut self,
        space: &KeySpace,
        from: u64,
        to: u64,
    ) -> Vec<(u64, StoredItem)> {
        let moving: Vec<u64> = self
            .items
            .keys()
            .copied()
            .filter(|&key| space.in_half_open(key, from, to))
            .collect();

        let mut drained = Vec::new();
        for key in moving {
            if let Some(bucket) = self.items.remove(&key) {
                for item in bucket {
                    self.bytes_stored -= item.value.len() as u64;
                    drained.push((key, item));
                }
            }
        }
        drained
    }

    /// Drain the whole store, for a departing node.
    pub fn drain_all(&mut self) -> Vec<(u64, StoredItem)> {
        self.bytes_stored = 0;
        let items = std::mem::take(&mut self.items);
        items
            .into_iter()
            .flat_map(|(key, bucket)| bucket.into_iter().map(move |item| (key, item)))
            .collect()
    }

    /// Absorb entries drained from another store.
    pub fn absorb(&mut self, entries: Vec<(u64, StoredItem)>) {
        for (key, StoredItem { name, value }) in entries {
            self.insert(key, &name, value);
        }
    }

    /// Iterate all `(key, item)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &StoredItem)> {
        self.items
            .iter()
            .flat_map(|(&key, bucket)| bucket.iter().map(move |item| (key, item)))
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.values().map(Vec::len).sum()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total value bytes at rest.
    pub fn bytes_stored(&self) -> u64 {
        self.bytes_stored
    }
}
