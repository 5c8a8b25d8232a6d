// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

use std::collections::HashMap;
use std::time::{Duration, Instant};

use hashing::{Digest, DigestSet, DigestSetBuilder, KeyFormat};

mod eviction;
pub use crate::eviction::{EvictionSet, FifoPolicy, LruPolicy, RandomReplacementPolicy};


///
/// A bounded map from digest keys to their insertion times, used to suppress repeated existence
/// checks and replications of blobs that were recently confirmed to be present.
///
/// Entries count as present only within `ttl` of insertion. Eviction is delegated to a pluggable
/// `EvictionSet`; `remove` tombstones an entry without freeing its eviction slot, so a removed
/// digest keeps occupying capacity until the policy evicts it.
///
pub struct ExistenceCache {
    policy: Box<dyn EvictionSet>,
    capacity: usize,
    ttl: Duration,
    key_format: KeyFormat,
    entries: HashMap<String, Instant>,
}

impl ExistenceCache {
    pub fn new(
        policy: Box<dyn EvictionSet>,
        capacity: usize,
        ttl: Duration,
        key_format: KeyFormat,
    ) -> ExistenceCache {
        ExistenceCache {
            policy,
            capacity,
            ttl,
            key_format,
            entries: HashMap::new(),
        }
    }

    pub fn key_format(&self) -> KeyFormat {
        self.key_format
    }

    ///
    /// Drops every digest that was inserted within the TTL, returning the remainder. Hits touch
    /// the eviction metadata, so frequently confirmed digests stay resident under LRU.
    ///
    pub fn remove_existing(&mut self, digests: &DigestSet) -> DigestSet {
        let mut builder = DigestSetBuilder::new();
        for digest in digests {
            let key = digest.get_key(self.key_format);
            match self.entries.get(&key) {
                Some(inserted) if inserted.elapsed() < self.ttl => {
                    self.policy.touch(&key);
                }
                _ => {
                    builder.add(digest.clone());
                }
            }
        }
        builder.build()
    }

    /// Records that every digest in the set is known to exist.
    pub fn add(&mut self, digests: &DigestSet) {
        let now = Instant::now();
        for digest in digests {
            let key = digest.get_key(self.key_format);
            if self.entries.contains_key(&key) {
                self.policy.touch(&key);
            } else {
                while self.policy.len() >= self.capacity {
                    match self.policy.evict() {
                        Some(victim) => {
                            self.entries.remove(&victim);
                        }
                        None => break,
                    }
                }
                self.policy.insert(&key);
            }
            self.entries.insert(key, now);
        }
    }

    /// Forgets a digest, e.g. because its blob was evicted from the backend. The eviction slot
    /// is not reclaimed.
    pub fn remove(&mut self, digest: &Digest) {
        self.entries.remove(&digest.get_key(self.key_format));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
