// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;

use itertools::Itertools;

use crate::{Digest, InstanceName};

///
/// Accumulates Digests into a DigestSet. Duplicates may be added freely; they are eliminated
/// when the set is built.
///
#[derive(Default)]
pub struct DigestSetBuilder {
    digests: Vec<Digest>,
}

impl DigestSetBuilder {
    pub fn new() -> DigestSetBuilder {
        DigestSetBuilder {
            digests: Vec::new(),
        }
    }

    pub fn add(&mut self, digest: Digest) -> &mut DigestSetBuilder {
        self.digests.push(digest);
        self
    }

    pub fn build(mut self) -> DigestSet {
        self.digests.sort();
        self.digests.dedup();
        DigestSet {
            digests: self.digests,
        }
    }
}

///
/// An immutable, sorted, deduplicated set of Digests. The sort order is the string form of the
/// digest, which makes merge-based set algebra possible in a single pass.
///
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DigestSet {
    digests: Vec<Digest>,
}

impl DigestSet {
    pub fn empty() -> DigestSet {
        DigestSet {
            digests: Vec::new(),
        }
    }

    pub fn single(digest: Digest) -> DigestSet {
        DigestSet {
            digests: vec![digest],
        }
    }

    pub fn items(&self) -> &[Digest] {
        &self.digests
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn first(&self) -> Option<&Digest> {
        self.digests.first()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.digests.binary_search(digest).is_ok()
    }

    ///
    /// Splits `self` against `other` in one merge pass, returning
    /// `(self − other, self ∩ other)`.
    ///
    pub fn difference_and_intersection(&self, other: &DigestSet) -> (DigestSet, DigestSet) {
        let mut difference = Vec::new();
        let mut intersection = Vec::new();
        let mut right = other.digests.iter().peekable();
        for digest in &self.digests {
            while let Some(r) = right.peek() {
                if *r < digest {
                    right.next();
                } else {
                    break;
                }
            }
            if right.peek().map(|r| *r == digest).unwrap_or(false) {
                intersection.push(digest.clone());
            } else {
                difference.push(digest.clone());
            }
        }
        (
            DigestSet {
                digests: difference,
            },
            DigestSet {
                digests: intersection,
            },
        )
    }

    /// The union of any number of sets: a k-way merge that eliminates duplicates in a single
    /// pass over the inputs.
    pub fn union(sets: &[DigestSet]) -> DigestSet {
        let digests = sets
            .iter()
            .map(|s| s.digests.iter())
            .kmerge()
            .dedup()
            .cloned()
            .collect();
        DigestSet { digests }
    }

    /// Splits the set by instance name, ordered by instance name.
    pub fn partition_by_instance_name(&self) -> Vec<(InstanceName, DigestSet)> {
        let mut partitions: BTreeMap<InstanceName, Vec<Digest>> = BTreeMap::new();
        for digest in &self.digests {
            partitions
                .entry(digest.instance_name().clone())
                .or_default()
                .push(digest.clone());
        }
        partitions
            .into_iter()
            .map(|(instance_name, digests)| (instance_name, DigestSet { digests }))
            .collect()
    }

    ///
    /// Drops any digests of the empty blob. The empty blob is always present, so probing
    /// backends for it is wasted work and some backends refuse to store it at all.
    ///
    pub fn remove_empty_blob(&self) -> DigestSet {
        DigestSet {
            digests: self
                .digests
                .iter()
                .filter(|d| !d.is_empty_blob())
                .cloned()
                .collect(),
        }
    }
}

impl FromIterator<Digest> for DigestSet {
    fn from_iter<T: IntoIterator<Item = Digest>>(iter: T) -> DigestSet {
        let mut builder = DigestSetBuilder::new();
        for digest in iter {
            builder.add(digest);
        }
        builder.build()
    }
}

impl IntoIterator for DigestSet {
    type Item = Digest;
    type IntoIter = std::vec::IntoIter<Digest>;

    fn into_iter(self) -> Self::IntoIter {
        self.digests.into_iter()
    }
}

impl<'a> IntoIterator for &'a DigestSet {
    type Item = &'a Digest;
    type IntoIter = std::slice::Iter<'a, Digest>;

    fn into_iter(self) -> Self::IntoIter {
        self.digests.iter()
    }
}
