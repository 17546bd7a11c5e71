//! `ActivationRecord` and the per-TT activation table (spec §3, §4.5, §5).
//!
//! A record is created lazily on first input delivery for a key and
//! removed from the table the instant its required mask is satisfied, so
//! that "at most one `ActivationRecord` exists per (TT, key) at any time"
//! (spec §8, invariant 2) holds without ever locking the whole table for
//! the duration of a fill. The table itself is sharded by key hash (spec
//! §5: "protected by a fine-grained lock keyed by hash bucket") rather
//! than guarded by one global mutex.

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;
use crate::key::Key;

const SHARD_COUNT: usize = 16;

/// A per-(TT, key) record tracking which input slots are filled.
///
/// Slot values are stored type-erased (`Box<dyn Any + Send + Sync>`): a
/// single `ActivationRecord` type serves every TT regardless of how many
/// distinct value types its slots carry. The owning TT's dispatcher knows
/// the concrete type of each slot and downcasts at fire time (spec §4.5,
/// "assembles the slot arguments honoring capability").
pub struct ActivationRecord {
    slots: Vec<Mutex<Option<Box<dyn Any + Send + Sync>>>>,
    filled: AtomicU64,
    required: u64,
}

impl ActivationRecord {
    fn new(num_slots: usize, required: u64) -> Self {
        assert!(num_slots <= 64, "ActivationRecord supports at most 64 input slots");
        let mut slots = Vec::with_capacity(num_slots);
        slots.resize_with(num_slots, || Mutex::new(None));
        ActivationRecord { slots, filled: AtomicU64::new(0), required }
    }

    /// Assigns `value` to `slot`. Returns `Ok(true)` if this fill was the
    /// last one needed to satisfy the required mask (spec §4.5 step 4).
    /// Fails with `DuplicateInput` if the slot was already filled.
    pub fn fill_slot(&self, slot: usize, value: Box<dyn Any + Send + Sync>) -> Result<bool, Error> {
        let mut guard = self.slots[slot].lock();
        if guard.is_some() {
            return Err(Error::DuplicateInput(format!("slot {} already filled for this key", slot)));
        }
        *guard = Some(value);
        drop(guard);
        let bit = 1u64 << slot;
        let now = self.filled.fetch_or(bit, Ordering::SeqCst) | bit;
        Ok(now == self.required)
    }

    /// Takes the value out of `slot`, for use when the task body fires.
    /// Panics if the slot was not filled; the scheduler only fires records
    /// whose required mask is fully satisfied (spec §8, invariant 3).
    pub fn take_slot(&self, slot: usize) -> Box<dyn Any + Send + Sync> {
        self.slots[slot].lock().take().expect("fired ActivationRecord had an unfilled required slot")
    }

    /// The number of slots this record has allocated.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

fn shard_of<K: Key>(key: &K) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

struct Shard<K> {
    map: Mutex<HashMap<K, Arc<ActivationRecord>>>,
}

/// The activation table for one template task: a find-or-insert map from
/// key to `ActivationRecord`, sharded for concurrency (spec §5).
pub struct ActivationTable<K> {
    shards: Vec<Shard<K>>,
    num_slots: usize,
    required_mask: u64,
}

impl<K: Key> ActivationTable<K> {
    /// Creates a table for a TT with `num_slots` input slots, all of
    /// which are required (spec §9 Open Question: optional inputs are not
    /// implemented, so `required_mask` is always `(1 << num_slots) - 1`).
    pub fn new(num_slots: usize) -> Self {
        let required_mask = if num_slots == 64 { u64::MAX } else { (1u64 << num_slots) - 1 };
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        shards.resize_with(SHARD_COUNT, || Shard { map: Mutex::new(HashMap::new()) });
        ActivationTable { shards, num_slots, required_mask }
    }

    /// Finds the activation record for `key`, creating it if this is the
    /// first input delivered for that key. The shard's lock makes this
    /// atomic: concurrent callers for the same key observe exactly one
    /// record (spec §4.5 step 2). The returned `bool` is `true` exactly
    /// when this call created the record, for callers that log activation
    /// creation (spec §B).
    pub fn get_or_insert(&self, key: &K) -> (Arc<ActivationRecord>, bool) {
        let shard = &self.shards[shard_of(key)];
        let mut map = shard.map.lock();
        let mut created = false;
        let record = map
            .entry(key.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(ActivationRecord::new(self.num_slots, self.required_mask))
            })
            .clone();
        (record, created)
    }

    /// Removes the record for `key`, if present. Called exactly once, by
    /// the filler that observes the required mask become satisfied (spec
    /// §4.5 step 4): "remove `ar` from the table and enqueue it."
    pub fn remove(&self, key: &K) -> Option<Arc<ActivationRecord>> {
        let shard = &self.shards[shard_of(key)];
        shard.map.lock().remove(key)
    }

    /// The number of activation records presently in flight, across all
    /// shards. Used by `fence` (spec §4.6) to detect local quiescence.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.lock().len()).sum()
    }

    /// Whether no activation records are presently in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_slot_fills_agree_on_exactly_one_ready_transition() {
        let table: ActivationTable<i32> = ActivationTable::new(2);
        let (ar, created) = table.get_or_insert(&7);
        assert!(created);
        assert!(!ar.fill_slot(0, Box::new(1u32)).unwrap());
        assert!(ar.fill_slot(1, Box::new(2u32)).unwrap());
    }

    #[test]
    fn duplicate_fill_is_rejected() {
        let table: ActivationTable<i32> = ActivationTable::new(1);
        let (ar, _) = table.get_or_insert(&1);
        assert!(ar.fill_slot(0, Box::new(1u32)).unwrap());
        assert!(matches!(ar.fill_slot(0, Box::new(2u32)), Err(Error::DuplicateInput(_))));
    }

    #[test]
    fn get_or_insert_returns_the_same_record_for_the_same_key() {
        let table: ActivationTable<&str> = ActivationTable::new(3);
        let (a, first_created) = table.get_or_insert(&"x");
        let (b, second_created) = table.get_or_insert(&"x");
        assert!(first_created);
        assert!(!second_created);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn remove_drops_the_record_out_of_the_table() {
        let table: ActivationTable<i32> = ActivationTable::new(1);
        table.get_or_insert(&1);
        assert_eq!(table.len(), 1);
        assert!(table.remove(&1).is_some());
        assert_eq!(table.len(), 0);
        assert!(table.remove(&1).is_none());
    }
}
