// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use buffer::Buffer;
use hashing::{DigestSet, InstanceName};
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use testutil::data::{sha256_function, TestData};
use testutil::stub_cas::{RequestType, StubCas};
use tonic::Code;

use crate::testing::{get_bytes, MAX_SIZE};
use crate::{ActionCacheGrpcBlobAccess, BlobAccess, CasGrpcBlobAccess};

const BATCH_API_SIZE_LIMIT: usize = 4 * 1024;

fn cas_backend(stub: &StubCas) -> CasGrpcBlobAccess {
    let channel = grpc_util::create_channel(stub.address()).unwrap();
    CasGrpcBlobAccess::new(channel, BATCH_API_SIZE_LIMIT)
}

fn action_cache_backend(stub: &StubCas) -> ActionCacheGrpcBlobAccess {
    let channel = grpc_util::create_channel(stub.address()).unwrap();
    ActionCacheGrpcBlobAccess::new(channel, MAX_SIZE)
}

#[tokio::test]
async fn get_streams_blobs_in_chunks() {
    let function = sha256_function("acme");
    let data = TestData::forty_kilobytes();
    let stub = StubCas::builder()
        .chunk_size_bytes(1024)
        .file(&data, &function)
        .build()
        .await;
    let backend = cas_backend(&stub);

    assert_eq!(
        get_bytes(&backend, &data.digest(&function)).await.unwrap(),
        data.bytes()
    );
    assert_eq!(stub.request_count(RequestType::BsRead), 1);
}

#[tokio::test]
async fn get_of_an_absent_blob_is_not_found() {
    let stub = StubCas::empty().await;
    let backend = cas_backend(&stub);
    let digest = TestData::hello().digest(&sha256_function(""));
    let err = get_bytes(&backend, &digest).await.unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn small_puts_use_the_batch_api() {
    let stub = StubCas::empty().await;
    let backend = cas_backend(&stub);
    let function = sha256_function("");
    let data = TestData::hello();
    let digest = data.digest(&function);

    backend
        .put(&digest, Buffer::from_validated_bytes(data.bytes()))
        .await
        .unwrap();
    assert_eq!(stub.request_count(RequestType::CasBatchUpdateBlobs), 1);
    assert_eq!(stub.request_count(RequestType::BsWrite), 0);
    assert_eq!(stub.blob(&digest).unwrap(), data.bytes());
}

#[tokio::test]
async fn large_puts_stream_over_the_byte_stream_api() {
    let stub = StubCas::empty().await;
    let backend = cas_backend(&stub);
    let function = sha256_function("acme");
    let data = TestData::forty_kilobytes();
    let digest = data.digest(&function);

    backend
        .put(&digest, Buffer::from_validated_bytes(data.bytes()))
        .await
        .unwrap();
    assert_eq!(stub.request_count(RequestType::BsWrite), 1);
    assert_eq!(stub.request_count(RequestType::CasBatchUpdateBlobs), 0);
    assert_eq!(stub.blob(&digest).unwrap(), data.bytes());
}

#[tokio::test]
async fn empty_blobs_are_served_without_any_request() {
    let stub = StubCas::empty().await;
    let backend = cas_backend(&stub);
    let digest = sha256_function("").empty_digest();

    assert!(get_bytes(&backend, &digest).await.unwrap().is_empty());
    backend
        .put(&digest, Buffer::from_validated_bytes(bytes::Bytes::new()))
        .await
        .unwrap();
    assert_eq!(stub.request_count(RequestType::BsRead), 0);
    assert_eq!(stub.request_count(RequestType::BsWrite), 0);
    assert_eq!(stub.request_count(RequestType::CasBatchUpdateBlobs), 0);
}

#[tokio::test]
async fn find_missing_round_trips() {
    let function = sha256_function("");
    let present = TestData::hello();
    let absent = TestData::catnip();
    let stub = StubCas::builder().file(&present, &function).build().await;
    let backend = cas_backend(&stub);

    let mut builder = hashing::DigestSetBuilder::new();
    builder.add(present.digest(&function));
    builder.add(absent.digest(&function));
    let missing = backend.find_missing(builder.build()).await.unwrap();
    assert_eq!(missing, DigestSet::single(absent.digest(&function)));
    assert_eq!(stub.request_count(RequestType::CasFindMissingBlobs), 1);
}

#[tokio::test]
async fn capabilities_are_fetched_from_the_server() {
    let stub = StubCas::empty().await;
    let backend = cas_backend(&stub);
    let capabilities = backend
        .get_capabilities(&InstanceName::empty())
        .await
        .unwrap();
    assert!(capabilities.cache_capabilities.is_some());
}

#[tokio::test]
async fn action_cache_round_trips() {
    let stub = StubCas::empty().await;
    let backend = action_cache_backend(&stub);
    let function = sha256_function("");
    let action_digest = TestData::new("the action").digest(&function);

    let action_result = remexec::ActionResult {
        exit_code: 1,
        ..remexec::ActionResult::default()
    };
    backend
        .put(&action_digest, Buffer::from_proto(&action_result))
        .await
        .unwrap();
    assert_eq!(stub.request_count(RequestType::AcUpdateActionResult), 1);

    let fetched: remexec::ActionResult = backend
        .get(&action_digest)
        .await
        .to_proto(MAX_SIZE)
        .await
        .unwrap();
    assert_eq!(fetched.exit_code, 1);
}

#[tokio::test]
async fn action_cache_misses_are_not_found() {
    let stub = StubCas::empty().await;
    let backend = action_cache_backend(&stub);
    let digest = TestData::new("no such action").digest(&sha256_function(""));
    let err = backend
        .get(&digest)
        .await
        .to_byte_slice(MAX_SIZE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn server_errors_propagate() {
    let stub = StubCas::builder().always_errors().build().await;
    let backend = cas_backend(&stub);
    let digest = TestData::hello().digest(&sha256_function(""));
    let err = get_bytes(&backend, &digest).await.unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
}
