// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{InstanceName, InstanceNameTrie};

fn name(value: &str) -> InstanceName {
    InstanceName::new(value).unwrap()
}

#[test]
fn exact_lookup() {
    let mut trie = InstanceNameTrie::new();
    assert_eq!(trie.set(&name("a/b"), 7), None);
    assert_eq!(trie.get_exact(&name("a/b")), Some(7));
    assert_eq!(trie.get_exact(&name("a")), None);
    assert_eq!(trie.get_exact(&name("a/b/c")), None);
    assert_eq!(trie.get_exact(&InstanceName::empty()), None);
}

#[test]
fn set_replaces() {
    let mut trie = InstanceNameTrie::new();
    assert_eq!(trie.set(&name("a"), 1), None);
    assert_eq!(trie.set(&name("a"), 2), Some(1));
    assert_eq!(trie.get_exact(&name("a")), Some(2));
}

#[test]
fn longest_prefix_lookup() {
    let mut trie = InstanceNameTrie::new();
    trie.set(&InstanceName::empty(), 0);
    trie.set(&name("a"), 1);
    trie.set(&name("a/b/c"), 3);

    assert_eq!(trie.get_longest_prefix(&InstanceName::empty()), Some(0));
    assert_eq!(trie.get_longest_prefix(&name("z")), Some(0));
    assert_eq!(trie.get_longest_prefix(&name("a")), Some(1));
    assert_eq!(trie.get_longest_prefix(&name("a/b")), Some(1));
    assert_eq!(trie.get_longest_prefix(&name("a/b/c")), Some(3));
    assert_eq!(trie.get_longest_prefix(&name("a/b/c/d")), Some(3));
}

#[test]
fn longest_prefix_requires_component_equality() {
    let mut trie = InstanceNameTrie::new();
    trie.set(&name("ab"), 1);
    // "ab" is a string prefix of "abc", but not a component prefix.
    assert_eq!(trie.get_longest_prefix(&name("abc")), None);
}

#[test]
fn remove_prunes_empty_subtrees() {
    let mut trie = InstanceNameTrie::new();
    trie.set(&name("a/b/c"), 3);
    trie.set(&name("a"), 1);

    assert_eq!(trie.remove(&name("a/b/c")), Some(3));
    assert_eq!(trie.remove(&name("a/b/c")), None);
    assert_eq!(trie.get_exact(&name("a/b/c")), None);
    // The "a" entry survives pruning of the "a/b" subtree.
    assert_eq!(trie.get_longest_prefix(&name("a/b/c")), Some(1));
}
