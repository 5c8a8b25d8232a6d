// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use hashing::{DigestFunction, Function, InstanceName};

use crate::gen::build::bazel::remote::execution::v2 as remexec;
use crate::{digest_function_from_wire, require_digest, require_digest_function};

fn sha256_function() -> Function {
    Function::new(InstanceName::empty(), DigestFunction::Sha256)
}

#[test]
fn digest_round_trips_through_the_wire_form() {
    let digest = sha256_function().empty_digest();
    let wire: remexec::Digest = (&digest).into();
    assert_eq!(wire.hash, digest.hash().to_hex());
    assert_eq!(wire.size_bytes, 0);
    assert_eq!(require_digest(&sha256_function(), &wire).unwrap(), digest);
}

#[test]
fn require_digest_rejects_missing() {
    require_digest(&sha256_function(), None).expect_err("Want err");
}

#[test]
fn require_digest_rejects_bad_hashes() {
    let wire = remexec::Digest {
        hash: "abcd".to_owned(),
        size_bytes: 5,
    };
    require_digest(&sha256_function(), &wire).expect_err("Want err");

    let wire = remexec::Digest {
        hash: sha256_function().empty_digest().hash().to_hex(),
        size_bytes: -1,
    };
    require_digest(&sha256_function(), &wire).expect_err("Want err");
}

#[test]
fn digest_function_values() {
    assert_eq!(
        digest_function_from_wire(remexec::digest_function::Value::Sha256 as i32).unwrap(),
        DigestFunction::Sha256
    );
    assert_eq!(
        digest_function_from_wire(remexec::digest_function::Value::Blake3 as i32).unwrap(),
        DigestFunction::Blake3
    );
    // SHA256TREE is a known wire value but not a supported function.
    digest_function_from_wire(remexec::digest_function::Value::Sha256tree as i32)
        .expect_err("Want err");
}

#[test]
fn unset_digest_function_defaults_to_sha256() {
    assert_eq!(
        require_digest_function(remexec::digest_function::Value::Unknown as i32).unwrap(),
        DigestFunction::Sha256
    );
}
