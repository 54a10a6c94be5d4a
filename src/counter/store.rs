//! Aggregate store - the single serialization point for counter state
//!
//! Holds both the entity -> last category map and the category -> counters
//! map behind ONE mutex. Every operation takes that lock for its whole
//! duration, so an observation's read-previous / write-new / two counter
//! adjustments commit as a single unit relative to other observations,
//! snapshots, resets and clears.
//!
//! ## Occupancy floor
//!
//! `reset_counters()` zeroes occupancy but keeps entity tracks. An entity
//! tracked in category A before the reset and seen in B afterwards would
//! drive A to -1. Occupancy is floored at zero instead; the skipped
//! decrement is logged.

use super::types::CategoryCounters;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct StoreState {
    /// entity id -> last observed category
    tracks: HashMap<String, String>,

    /// category -> counters (ordered so snapshots are stable)
    counters: BTreeMap<String, CategoryCounters>,
}

/// Shared, mutation-guarded counter state
#[derive(Debug, Default)]
pub struct AggregateStore {
    state: Mutex<StoreState>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            log::warn!("⚠️  Aggregate store lock was poisoned, recovering state");
            poisoned.into_inner()
        })
    }

    /// Apply one observation atomically
    ///
    /// 1. Records `category` as the entity's current category
    /// 2. Increments crossed and occupancy for `category`
    /// 3. Decrements occupancy of the previous category if it differs
    ///
    /// A repeat observation in the same category only increments.
    pub fn observe(&self, entity_id: &str, category: &str) {
        let mut state = self.lock();

        let previous = state
            .tracks
            .insert(entity_id.to_string(), category.to_string());

        let current = state.counters.entry(category.to_string()).or_default();
        current.crossed_count += 1;
        current.occupancy_count += 1;
        log::trace!(
            "{}: crossed = {}, on course = {}",
            category,
            current.crossed_count,
            current.occupancy_count
        );

        if let Some(previous) = previous.filter(|p| p != category) {
            match state.counters.get_mut(&previous) {
                Some(prev) if prev.occupancy_count > 0 => prev.occupancy_count -= 1,
                Some(_) => {
                    log::warn!(
                        "⚠️  Occupancy of {} already zero, skipping decrement for {}",
                        previous,
                        entity_id
                    );
                }
                None => {
                    log::warn!(
                        "⚠️  No counters for previous category {} of {}",
                        previous,
                        entity_id
                    );
                }
            }
        }
    }

    /// Point-in-time copy of all category counters, ordered by category
    ///
    /// The lock is released before the copy is returned, so callers can do
    /// slow I/O with the result.
    pub fn snapshot(&self) -> Vec<(String, CategoryCounters)> {
        let state = self.lock();
        state
            .counters
            .iter()
            .map(|(category, counters)| (category.clone(), *counters))
            .collect()
    }

    /// Zero every category's counters, keeping the category keys
    pub fn reset_counters(&self) {
        let mut state = self.lock();
        for counters in state.counters.values_mut() {
            *counters = CategoryCounters::default();
        }
        log::info!("🔄 Reset counters for {} categories", state.counters.len());
    }

    /// Remove all categories and all entity tracks
    pub fn clear(&self) {
        let mut state = self.lock();
        state.counters.clear();
        state.tracks.clear();
        log::info!("🧹 Cleared counter cache");
    }

    /// Counters for a single category
    pub fn counters(&self, category: &str) -> Option<CategoryCounters> {
        self.lock().counters.get(category).copied()
    }

    /// Last category recorded for an entity
    pub fn last_category(&self, entity_id: &str) -> Option<String> {
        self.lock().tracks.get(entity_id).cloned()
    }

    pub fn category_count(&self) -> usize {
        self.lock().counters.len()
    }

    pub fn tracked_entity_count(&self) -> usize {
        self.lock().tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn occupancy(store: &AggregateStore, category: &str) -> i64 {
        store.counters(category).unwrap().occupancy_count
    }

    fn crossed(store: &AggregateStore, category: &str) -> u64 {
        store.counters(category).unwrap().crossed_count
    }

    #[test]
    fn test_single_entity_transitions() {
        // Test: E goes A -> B -> C, only C holds occupancy
        let store = AggregateStore::new();

        store.observe("runner_1", "A");
        store.observe("runner_1", "B");
        store.observe("runner_1", "C");

        assert_eq!(occupancy(&store, "A"), 0);
        assert_eq!(occupancy(&store, "B"), 0);
        assert_eq!(occupancy(&store, "C"), 1);
        assert_eq!(crossed(&store, "A"), 1);
        assert_eq!(crossed(&store, "B"), 1);
        assert_eq!(crossed(&store, "C"), 1);
        assert_eq!(store.last_category("runner_1"), Some("C".to_string()));
    }

    #[test]
    fn test_repeat_observation_never_decrements() {
        // Test: same category three times increments both counters each time
        let store = AggregateStore::new();

        for _ in 0..3 {
            store.observe("runner_1", "A");
        }

        assert_eq!(crossed(&store, "A"), 3);
        assert_eq!(occupancy(&store, "A"), 3);
    }

    #[test]
    fn test_reset_keeps_categories() {
        // Test: reset zeroes counters but keeps keys and doesn't resurrect counts
        let store = AggregateStore::new();
        store.observe("runner_1", "A");
        store.observe("runner_2", "A");
        store.observe("runner_3", "B");

        store.reset_counters();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        for (_, counters) in &snapshot {
            assert_eq!(*counters, CategoryCounters::default());
        }

        store.observe("runner_4", "A");
        assert_eq!(crossed(&store, "A"), 1);
        assert_eq!(occupancy(&store, "A"), 1);
    }

    #[test]
    fn test_occupancy_floor_after_reset() {
        // Test: a stale track moving after reset can't push occupancy negative
        let store = AggregateStore::new();
        store.observe("runner_1", "A");

        store.reset_counters();
        store.observe("runner_1", "B");

        assert_eq!(occupancy(&store, "A"), 0);
        assert_eq!(crossed(&store, "A"), 0);
        assert_eq!(occupancy(&store, "B"), 1);
        assert_eq!(crossed(&store, "B"), 1);
    }

    #[test]
    fn test_clear_forgets_entities() {
        // Test: after clear, snapshot is empty and old entities are unseen
        let store = AggregateStore::new();
        store.observe("runner_1", "A");
        store.observe("runner_2", "B");

        store.clear();

        assert!(store.snapshot().is_empty());
        assert_eq!(store.tracked_entity_count(), 0);
        assert_eq!(store.last_category("runner_1"), None);

        // No previous category, so no decrement (and no phantom "A" entry)
        store.observe("runner_1", "B");
        assert_eq!(store.counters("A"), None);
        assert_eq!(crossed(&store, "B"), 1);
        assert_eq!(occupancy(&store, "B"), 1);
    }

    #[test]
    fn test_snapshot_is_ordered_copy() {
        // Test: snapshot is sorted by category and detached from the store
        let store = AggregateStore::new();
        store.observe("r1", "mat_c");
        store.observe("r2", "mat_a");
        store.observe("r3", "mat_b");

        let snapshot = store.snapshot();
        store.observe("r4", "mat_a");

        let categories: Vec<&str> = snapshot.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(categories, vec!["mat_a", "mat_b", "mat_c"]);
        assert_eq!(snapshot[0].1.crossed_count, 1);
        assert_eq!(crossed(&store, "mat_a"), 2);
    }

    #[test]
    fn test_concurrent_disjoint_entities() {
        // Test: N threads, each one entity into its own category, no lost updates
        let store = Arc::new(AggregateStore::new());
        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    store.observe(&format!("runner_{}", i), &format!("mat_{}", i));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 64);
        for (_, counters) in snapshot {
            assert_eq!(counters, CategoryCounters::new(1, 1));
        }
    }

    #[test]
    fn test_concurrent_same_entity_race() {
        // Test: two callers race the same fresh entity into A and B; whichever
        // commits last holds the occupancy, the other is back at zero
        let store = Arc::new(AggregateStore::new());

        for round in 0..200 {
            let entity = format!("runner_{}", round);
            let cat_a = format!("A_{}", round);
            let cat_b = format!("B_{}", round);
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = [cat_a.clone(), cat_b.clone()]
                .into_iter()
                .map(|category| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    let entity = entity.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        store.observe(&entity, &category);
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            let a = store.counters(&cat_a).unwrap();
            let b = store.counters(&cat_b).unwrap();
            assert_eq!(a.crossed_count, 1);
            assert_eq!(b.crossed_count, 1);

            let last = store.last_category(&entity).unwrap();
            let (holder, other) = if last == cat_a { (a, b) } else { (b, a) };
            assert_eq!(holder.occupancy_count, 1);
            assert_eq!(other.occupancy_count, 0);
        }
    }

    #[test]
    fn test_concurrent_same_entity_flood() {
        // Test: heavy contention on one entity loses no crossings and the
        // entity's last category always holds occupancy
        let store = Arc::new(AggregateStore::new());
        let handles: Vec<_> = (0..16)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        let category = if (t + i) % 2 == 0 { "A" } else { "B" };
                        store.observe("runner_1", category);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let a = store.counters("A").unwrap();
        let b = store.counters("B").unwrap();
        assert_eq!(a.crossed_count + b.crossed_count, 16 * 500);

        let last = store.last_category("runner_1").unwrap();
        let holder = if last == "A" { a } else { b };
        assert!(holder.occupancy_count >= 1);
        assert!(a.occupancy_count >= 0 && b.occupancy_count >= 0);
    }

    #[test]
    fn test_concurrent_transitions_conserve_occupancy() {
        // Test: many entities moving between categories keep total occupancy
        // equal to the number of tracked entities (no repeats in a row)
        let store = Arc::new(AggregateStore::new());
        let categories = ["A", "B", "C", "D"];

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for step in 0..200 {
                        let entity = format!("runner_{}_{}", t, step % 10);
                        let category = categories[(step / 10 + t) % categories.len()];
                        store.observe(&entity, category);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let total: i64 = store.snapshot().iter().map(|(_, c)| c.occupancy_count).sum();
        assert_eq!(total, store.tracked_entity_count() as i64);
    }

    #[test]
    fn test_observe_racing_clear() {
        // Test: observations interleaved with clears never leave negative occupancy
        let store = Arc::new(AggregateStore::new());

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..2000 {
                    let category = if i % 3 == 0 { "A" } else { "B" };
                    store.observe(&format!("runner_{}", i % 7), category);
                }
            })
        };
        let clearer = {
            let store = store.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    store.clear();
                    thread::yield_now();
                }
            })
        };

        writer.join().unwrap();
        clearer.join().unwrap();

        for (_, counters) in store.snapshot() {
            assert!(counters.occupancy_count >= 0);
        }
    }
}
