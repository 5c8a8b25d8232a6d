// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{BTreeMap, HashMap, VecDeque};

use rand::Rng;

///
/// The bookkeeping half of a bounded cache: an ordered multiset of keys from which a victim can
/// be chosen. Implementations tolerate duplicate insertions of the same key; a duplicate simply
/// occupies an extra slot until it is evicted.
///
pub trait EvictionSet: Send {
    /// Registers a key that was just inserted into the cache.
    fn insert(&mut self, key: &str);

    /// Notes that an existing key was accessed.
    fn touch(&mut self, key: &str);

    /// Removes and returns the next victim, if any.
    fn evict(&mut self) -> Option<String>;

    fn len(&self) -> usize;
}

/// Evicts the least recently inserted or touched key.
#[derive(Default)]
pub struct LruPolicy {
    sequence: u64,
    order: BTreeMap<u64, String>,
    keys: HashMap<String, u64>,
}

impl LruPolicy {
    pub fn new() -> LruPolicy {
        LruPolicy::default()
    }

    fn move_to_back(&mut self, key: &str) {
        if let Some(old) = self.keys.get(key).copied() {
            self.order.remove(&old);
        }
        self.sequence += 1;
        self.order.insert(self.sequence, key.to_owned());
        self.keys.insert(key.to_owned(), self.sequence);
    }
}

impl EvictionSet for LruPolicy {
    fn insert(&mut self, key: &str) {
        self.move_to_back(key);
    }

    fn touch(&mut self, key: &str) {
        self.move_to_back(key);
    }

    fn evict(&mut self) -> Option<String> {
        let (&sequence, _) = self.order.iter().next()?;
        let key = self.order.remove(&sequence).unwrap();
        self.keys.remove(&key);
        Some(key)
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Evicts keys in insertion order, ignoring later accesses.
#[derive(Default)]
pub struct FifoPolicy {
    queue: VecDeque<String>,
}

impl FifoPolicy {
    pub fn new() -> FifoPolicy {
        FifoPolicy::default()
    }
}

impl EvictionSet for FifoPolicy {
    fn insert(&mut self, key: &str) {
        self.queue.push_back(key.to_owned());
    }

    fn touch(&mut self, _key: &str) {}

    fn evict(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Evicts a uniformly random key. Cheap and scan resistant.
#[derive(Default)]
pub struct RandomReplacementPolicy {
    keys: Vec<String>,
}

impl RandomReplacementPolicy {
    pub fn new() -> RandomReplacementPolicy {
        RandomReplacementPolicy::default()
    }
}

impl EvictionSet for RandomReplacementPolicy {
    fn insert(&mut self, key: &str) {
        self.keys.push(key.to_owned());
    }

    fn touch(&mut self, _key: &str) {}

    fn evict(&mut self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.keys.len());
        Some(self.keys.swap_remove(index))
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}
