// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::InstanceName;

#[test]
fn empty_is_valid() {
    let instance_name = InstanceName::new("").unwrap();
    assert!(instance_name.is_empty());
    assert_eq!(instance_name.components(), Vec::<&str>::new());
}

#[test]
fn multi_component_names() {
    let instance_name = InstanceName::new("acme/dev/linux").unwrap();
    assert_eq!(instance_name.components(), vec!["acme", "dev", "linux"]);
    assert_eq!(format!("{instance_name}"), "acme/dev/linux");
}

#[test]
fn rejects_reserved_keywords() {
    for name in [
        "blobs",
        "uploads",
        "actions",
        "actionResults",
        "operations",
        "capabilities",
        "compressed-blobs",
        "acme/uploads",
        "uploads/acme",
        "acme/blobs/dev",
    ] {
        InstanceName::new(name).expect_err("Want err");
    }
}

#[test]
fn rejects_redundant_slashes() {
    for name in ["/acme", "acme/", "acme//dev", "/"] {
        InstanceName::new(name).expect_err("Want err");
    }
}

#[test]
fn prefixes_ascend_from_empty() {
    let instance_name = InstanceName::new("a/b/c").unwrap();
    let prefixes: Vec<String> = instance_name
        .prefixes()
        .iter()
        .map(|p| p.as_str().to_owned())
        .collect();
    assert_eq!(prefixes, vec!["", "a", "a/b", "a/b/c"]);
}

#[test]
fn prefixes_of_empty() {
    assert_eq!(InstanceName::empty().prefixes(), vec![InstanceName::empty()]);
}
