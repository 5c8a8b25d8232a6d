// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use hashing::{DigestSet, KeyFormat};
use testutil::data::{sha256_function, TestData};
use tonic::{Code, Status};

use crate::replication::LocalBlobReplicator;
use crate::testing::{get_bytes, put_bytes, ErroringBlobAccess};
use crate::{BlobAccess, BlobAccessKind, MemoryBlobAccess, ReadFallbackBlobAccess};

fn new_backend() -> Arc<MemoryBlobAccess> {
    Arc::new(MemoryBlobAccess::new(
        BlobAccessKind::Cas,
        KeyFormat::WithInstance,
    ))
}

#[tokio::test]
async fn get_falls_back_to_the_secondary() {
    let primary = new_backend();
    let secondary = new_backend();
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));
    put_bytes(secondary.as_ref(), &digest, data.bytes()).await;

    let fallback = ReadFallbackBlobAccess::new(primary, secondary, None);
    assert_eq!(get_bytes(&fallback, &digest).await.unwrap(), data.bytes());
}

#[tokio::test]
async fn get_with_replicator_populates_the_primary() {
    let primary = new_backend();
    let secondary = new_backend();
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));
    put_bytes(secondary.as_ref(), &digest, data.bytes()).await;

    let replicator = Arc::new(LocalBlobReplicator::new(secondary.clone(), primary.clone()));
    let fallback = ReadFallbackBlobAccess::new(primary.clone(), secondary, Some(replicator));
    assert_eq!(get_bytes(&fallback, &digest).await.unwrap(), data.bytes());
    // A later existence check on the primary reports the digest as present.
    assert!(primary
        .find_missing(DigestSet::single(digest))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn writes_only_reach_the_primary() {
    let primary = new_backend();
    let secondary = new_backend();
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));

    let fallback = ReadFallbackBlobAccess::new(primary.clone(), secondary.clone(), None);
    put_bytes(&fallback, &digest, data.bytes()).await;
    assert_eq!(primary.len(), 1);
    assert_eq!(secondary.len(), 0);
}

#[tokio::test]
async fn find_missing_chains_both_backends() {
    let primary = new_backend();
    let secondary = new_backend();
    let function = sha256_function("");
    let in_primary = TestData::new("primary blob");
    let in_secondary = TestData::new("secondary blob");
    let nowhere = TestData::new("absent blob");
    put_bytes(primary.as_ref(), &in_primary.digest(&function), in_primary.bytes()).await;
    put_bytes(
        secondary.as_ref(),
        &in_secondary.digest(&function),
        in_secondary.bytes(),
    )
    .await;

    let replicator = Arc::new(LocalBlobReplicator::new(secondary.clone(), primary.clone()));
    let fallback =
        ReadFallbackBlobAccess::new(primary.clone(), secondary, Some(replicator));

    let mut builder = hashing::DigestSetBuilder::new();
    builder.add(in_primary.digest(&function));
    builder.add(in_secondary.digest(&function));
    builder.add(nowhere.digest(&function));
    let missing = fallback.find_missing(builder.build()).await.unwrap();
    assert_eq!(missing, DigestSet::single(nowhere.digest(&function)));

    // The digest that only the secondary had was proactively replicated to the primary.
    assert!(primary
        .find_missing(DigestSet::single(in_secondary.digest(&function)))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn errors_name_the_tier_that_failed() {
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));

    // A failing primary is reported as such.
    let fallback = ReadFallbackBlobAccess::new(
        Arc::new(ErroringBlobAccess {
            error: Status::unavailable("Connection refused"),
        }),
        new_backend(),
        None,
    );
    let err = get_bytes(&fallback, &digest).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert!(err.message().starts_with("Primary: "), "{}", err.message());

    // A primary miss followed by a failing secondary is attributed to the secondary.
    let fallback = ReadFallbackBlobAccess::new(
        new_backend(),
        Arc::new(ErroringBlobAccess {
            error: Status::unavailable("Connection refused"),
        }),
        None,
    );
    let err = get_bytes(&fallback, &digest).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert!(err.message().starts_with("Secondary: "), "{}", err.message());
}
