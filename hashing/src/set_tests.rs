// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeSet;

use crate::{Digest, DigestFunction, DigestSet, DigestSetBuilder, Function, InstanceName};

fn digest(instance_name: &str, seed: &str, size_bytes: i64) -> Digest {
    let function = Function::new(
        InstanceName::new(instance_name).unwrap(),
        DigestFunction::Sha256,
    );
    let mut generator = function.new_generator();
    generator.update(seed.as_bytes());
    let hash = generator.finish().hash().to_hex();
    function.new_digest(&hash, size_bytes).unwrap()
}

fn set_of(digests: &[Digest]) -> DigestSet {
    let mut builder = DigestSetBuilder::new();
    for d in digests {
        builder.add(d.clone());
    }
    builder.build()
}

#[test]
fn builder_sorts_and_deduplicates() {
    let a = digest("", "a", 1);
    let b = digest("", "b", 2);
    let set = set_of(&[b.clone(), a.clone(), b.clone(), a.clone()]);
    assert_eq!(set.len(), 2);
    let sorted: Vec<&Digest> = set.items().iter().collect();
    let mut expected = vec![&a, &b];
    expected.sort();
    assert_eq!(sorted, expected);
}

#[test]
fn first_and_emptiness() {
    assert!(DigestSet::empty().is_empty());
    assert_eq!(DigestSet::empty().first(), None);
    let a = digest("", "a", 1);
    let set = DigestSet::single(a.clone());
    assert_eq!(set.first(), Some(&a));
    assert!(!set.is_empty());
}

#[test]
fn union_equals_mathematical_union() {
    let digests: Vec<Digest> = (0..20).map(|i| digest("", &format!("{i}"), i)).collect();
    let s1 = set_of(&digests[0..10]);
    let s2 = set_of(&digests[5..15]);
    let s3 = set_of(&digests[12..20]);
    let union = DigestSet::union(&[s1.clone(), s2.clone(), s3.clone()]);

    let expected: BTreeSet<Digest> = [s1, s2, s3]
        .into_iter()
        .flat_map(|s| s.into_iter())
        .collect();
    assert_eq!(union.len(), expected.len());
    // Total ordering is preserved.
    let items = union.items();
    for window in items.windows(2) {
        assert!(window[0] < window[1]);
    }
    for d in &expected {
        assert!(union.contains(d));
    }
}

#[test]
fn difference_and_intersection() {
    let a = digest("", "a", 1);
    let b = digest("", "b", 2);
    let c = digest("", "c", 3);
    let left = set_of(&[a.clone(), b.clone()]);
    let right = set_of(&[b.clone(), c.clone()]);
    let (difference, intersection) = left.difference_and_intersection(&right);
    assert_eq!(difference, DigestSet::single(a));
    assert_eq!(intersection, DigestSet::single(b));
}

#[test]
fn partition_by_instance_name() {
    let a1 = digest("acme", "a", 1);
    let a2 = digest("acme", "b", 2);
    let b1 = digest("zork", "a", 1);
    let set = set_of(&[a1.clone(), b1.clone(), a2.clone()]);
    let partitions = set.partition_by_instance_name();
    assert_eq!(partitions.len(), 2);
    assert_eq!(partitions[0].0, InstanceName::new("acme").unwrap());
    assert_eq!(partitions[0].1, set_of(&[a1, a2]));
    assert_eq!(partitions[1].0, InstanceName::new("zork").unwrap());
    assert_eq!(partitions[1].1, DigestSet::single(b1));
}

#[test]
fn remove_empty_blob() {
    let empty = Function::new(InstanceName::empty(), DigestFunction::Sha256).empty_digest();
    let nonempty = digest("", "a", 5);
    let set = set_of(&[empty, nonempty.clone()]);
    assert_eq!(set.remove_empty_blob(), DigestSet::single(nonempty));
}

#[test]
fn from_iterator() {
    let a = digest("", "a", 1);
    let set: DigestSet = vec![a.clone(), a.clone()].into_iter().collect();
    assert_eq!(set, DigestSet::single(a));
}
