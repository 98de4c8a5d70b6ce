//! Bounded least-recently-used map
//!
//! A `HashMap` holds the entries together with the logical tick of their
//! last access; a `BTreeMap` keyed by that tick gives the access order.
//! Eviction removes the smallest tick, which is the least recently
//! touched entry. Recency is updated on every read through `get` and
//! `get_or_insert_with`; `peek` leaves it unchanged.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct BoundedLru<K, V> {
    entries: HashMap<K, (V, u64)>,
    recency: BTreeMap<u64, K>,
    capacity: usize,
    tick: u64,
    evictions: u64,
}

impl<K: Hash + Eq + Clone, V> BoundedLru<K, V> {
    /// Create an empty map holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
            capacity,
            tick: 0,
            evictions: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Move `key` to the most recently used position.
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick();
        if let Some((_, last)) = self.entries.get_mut(key) {
            self.recency.remove(last);
            *last = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }

    /// Return the value for `key`, creating it with `make` if absent.
    ///
    /// Inserting into a full map first evicts the least recently used entry.
    pub fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> &mut V {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        let tick = self.next_tick();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let slot = occupied.into_mut();
                self.recency.remove(&slot.1);
                slot.1 = tick;
                self.recency.insert(tick, key);
                &mut slot.0
            }
            Entry::Vacant(vacant) => {
                self.recency.insert(tick, key);
                &mut vacant.insert((make(), tick)).0
            }
        }
    }

    /// Get a value and refresh its recency.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get(key).map(|(value, _)| value)
    }

    /// Get a value without touching its recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|(value, _)| value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries evicted since construction.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Keys from least to most recently used.
    pub fn keys_by_recency(&self) -> impl Iterator<Item = &K> {
        self.recency.values()
    }
}
