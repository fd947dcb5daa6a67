//! Register state reconstruction with an LRU snapshot cache.
//!
//! `state_at(index)` answers "what did the register file look like after
//! event `index`?". Naive replay is O(n) per query; the reconstructor
//! keeps a bounded cache of previously computed snapshots and replays
//! only the events between the nearest cached snapshot and the requested
//! index. Caching is purely an optimization: the result is always
//! identical to a full replay from event zero.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::store::EventStore;

/// Default number of cached snapshots.
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;

/// Replays longer than this also insert a midpoint snapshot, so a later
/// query landing between two distant checkpoints replays half as much.
const MIDPOINT_REPLAY_THRESHOLD: usize = 10_000;

/// Reconstructs full register snapshots at arbitrary event indices.
///
/// Owns its snapshot cache; there is no shared global state. Hosts
/// running concurrent queries give each worker its own instance (or
/// wrap one instance in a mutex).
pub struct RegisterReconstructor {
    cache: LruCache<usize, HashMap<String, u64>>,
}

impl RegisterReconstructor {
    /// Create a reconstructor holding at most `capacity` snapshots.
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Register file after applying events 0..=`index` in order: reads
    /// seed a register's first observed value, last write wins. An
    /// out-of-range index clamps to the final event; an empty store
    /// yields an empty map.
    pub fn state_at(&mut self, store: &EventStore, index: usize) -> HashMap<String, u64> {
        if store.is_empty() {
            return HashMap::new();
        }
        let index = index.min(store.len() - 1);
        if let Some(snapshot) = self.cache.get(&index) {
            return snapshot.clone();
        }

        let base = self
            .cache
            .iter()
            .map(|(k, _)| *k)
            .filter(|k| *k <= index)
            .max();
        let (mut regs, start) = match base {
            Some(b) => (self.cache.peek(&b).cloned().unwrap_or_default(), b + 1),
            None => (HashMap::new(), 0),
        };

        let distance = index + 1 - start;
        let midpoint = (distance > MIDPOINT_REPLAY_THRESHOLD).then(|| start + distance / 2);
        for (i, event) in store.events()[start..=index].iter().enumerate() {
            for (name, value) in &event.reads {
                regs.entry(name.clone()).or_insert(*value);
            }
            for (name, value) in &event.writes {
                regs.insert(name.clone(), *value);
            }
            if midpoint == Some(start + i) {
                self.cache.put(start + i, regs.clone());
            }
        }

        self.cache.put(index, regs.clone());
        regs
    }

    /// Drop all cached snapshots.
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for RegisterReconstructor {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_store() -> EventStore {
        EventStore::parse_str(
            r#"[1][m 0x0][0] 0x1000: "mov r1, #1" => r1=0x1
[2][m 0x4][0] 0x1004: "mov r2, #2" => r2=0x2
[3][m 0x8][0] 0x1008: "add r1, r1, r2" r1=0x1 r2=0x2 => r1=0x3
[4][m 0xc][0] 0x100c: "mov r2, r1" r1=0x3 => r2=0x3"#,
        )
    }

    fn full_replay(store: &EventStore, index: usize) -> HashMap<String, u64> {
        let mut regs = HashMap::new();
        for event in &store.events()[..=index] {
            for (name, value) in &event.reads {
                regs.entry(name.clone()).or_insert(*value);
            }
            for (name, value) in &event.writes {
                regs.insert(name.clone(), *value);
            }
        }
        regs
    }

    #[test]
    fn test_state_matches_full_replay() {
        let store = demo_store();
        let mut recon = RegisterReconstructor::default();
        for index in 0..store.len() {
            assert_eq!(recon.state_at(&store, index), full_replay(&store, index));
        }
        // Repeat in reverse: cached snapshots must not change answers.
        for index in (0..store.len()).rev() {
            assert_eq!(recon.state_at(&store, index), full_replay(&store, index));
        }
    }

    #[test]
    fn test_out_of_range_clamps_and_empty_is_empty() {
        let store = demo_store();
        let mut recon = RegisterReconstructor::new(4);
        assert_eq!(
            recon.state_at(&store, 1_000_000),
            full_replay(&store, store.len() - 1)
        );

        let empty = EventStore::parse_str("");
        assert!(recon.state_at(&empty, 0).is_empty());
    }

    #[test]
    fn test_tiny_capacity_still_correct() {
        let store = demo_store();
        let mut recon = RegisterReconstructor::new(1);
        for index in [3, 0, 2, 1, 3, 0] {
            assert_eq!(recon.state_at(&store, index), full_replay(&store, index));
        }
    }
}
