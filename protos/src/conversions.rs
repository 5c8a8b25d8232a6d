// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use tonic::Status;

use crate::gen::build::bazel::remote::execution::v2 as remexec;

impl<'a> From<&'a hashing::Digest> for remexec::Digest {
    fn from(d: &'a hashing::Digest) -> Self {
        Self {
            hash: d.hash().to_hex(),
            size_bytes: d.size_bytes() as i64,
        }
    }
}

impl From<hashing::Digest> for remexec::Digest {
    fn from(d: hashing::Digest) -> Self {
        (&d).into()
    }
}

///
/// Converts a wire digest into a `hashing::Digest`. The wire form carries neither an instance
/// name nor a digest function, so the caller must supply both through a `hashing::Function`.
///
pub fn require_digest<'a, D: Into<Option<&'a remexec::Digest>>>(
    function: &hashing::Function,
    digest_opt: D,
) -> Result<hashing::Digest, Status> {
    match digest_opt.into() {
        Some(digest) => function.new_digest(&digest.hash, digest.size_bytes),
        None => Err(Status::invalid_argument(
            "Protocol violation: Digest missing from a Remote Execution API protobuf",
        )),
    }
}

/// Converts a wire digest function value, rejecting functions this build does not support.
pub fn digest_function_from_wire(value: i32) -> Result<hashing::DigestFunction, Status> {
    u8::try_from(value)
        .ok()
        .and_then(hashing::DigestFunction::from_enum_value)
        .ok_or_else(|| {
            Status::invalid_argument(format!("Unsupported digest function value {value}"))
        })
}

///
/// Resolves the digest function for a request: an explicit wire value wins, and the protocol's
/// legacy default of SHA256 applies when the field is unset.
///
pub fn require_digest_function(value: i32) -> Result<hashing::DigestFunction, Status> {
    if value == remexec::digest_function::Value::Unknown as i32 {
        Ok(hashing::DigestFunction::Sha256)
    } else {
        digest_function_from_wire(value)
    }
}

pub fn digest_function_to_wire(function: hashing::DigestFunction) -> i32 {
    i32::from(function.enum_value())
}
