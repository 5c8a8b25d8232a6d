// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;
use std::time::Duration;

use cache::{ExistenceCache, LruPolicy};
use hashing::KeyFormat;
use parking_lot::Mutex;
use testutil::data::{sha256_function, TestData};
use tonic::Code;

use crate::testing::MAX_SIZE;
use crate::{CasReadBufferFactory, ReadBufferFactory, ValidationCachingReadBufferFactory};

fn new_cache() -> ExistenceCache {
    ExistenceCache::new(
        Box::new(LruPolicy::new()),
        16,
        Duration::from_secs(3600),
        KeyFormat::WithInstance,
    )
}

#[tokio::test]
async fn cas_factory_checks_contents() {
    let factory = CasReadBufferFactory;
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));

    let buffer = factory.new_buffer_from_byte_slice(&digest, data.bytes(), None);
    assert_eq!(buffer.to_byte_slice(MAX_SIZE).await.unwrap(), data.bytes());

    let corrupted =
        factory.new_buffer_from_byte_slice(&digest, TestData::catnip().bytes(), None);
    let err = corrupted.to_byte_slice(MAX_SIZE).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

#[tokio::test]
async fn validation_caching_short_circuits_after_a_successful_check() {
    let factory = ValidationCachingReadBufferFactory::new(
        Arc::new(CasReadBufferFactory),
        new_cache(),
    );
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));

    // First read validates and records the success.
    let buffer = factory.new_buffer_from_byte_slice(&digest, data.bytes(), None);
    assert_eq!(buffer.to_byte_slice(MAX_SIZE).await.unwrap(), data.bytes());

    // Corrupted data under the same digest now sails through: validation is skipped. This is
    // exactly the trade the cache makes, observable here as proof of the short circuit.
    let corrupted =
        factory.new_buffer_from_byte_slice(&digest, TestData::catnip().bytes(), None);
    assert_eq!(
        corrupted.to_byte_slice(MAX_SIZE).await.unwrap(),
        TestData::catnip().bytes()
    );
}

#[tokio::test]
async fn validation_caching_enables_random_access_after_one_pass() {
    let factory = ValidationCachingReadBufferFactory::new(
        Arc::new(CasReadBufferFactory),
        new_cache(),
    );
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));

    // A checksummed reader-at buffer only supports sequential consumption.
    let buffer = factory.new_buffer_from_reader_at(&digest, Box::new(data.bytes()), None);
    assert_eq!(buffer.to_byte_slice(MAX_SIZE).await.unwrap(), data.bytes());

    // Once validated, the same blob serves random access reads.
    let buffer = factory.new_buffer_from_reader_at(&digest, Box::new(data.bytes()), None);
    let reader = buffer.to_reader_at().await.unwrap();
    assert_eq!(
        reader.read_at(7, 5).await.unwrap(),
        bytes::Bytes::from_static(b"world")
    );
}

#[tokio::test]
async fn a_failed_check_forgets_the_digest_and_repairs() {
    let factory = ValidationCachingReadBufferFactory::new(
        Arc::new(CasReadBufferFactory),
        new_cache(),
    );
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));

    let verdicts: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let verdicts2 = verdicts.clone();
    let callback: buffer::DataIntegrityCallback = Arc::new(move |valid| {
        verdicts2.lock().push(valid);
    });

    let corrupted = factory.new_buffer_from_byte_slice(
        &digest,
        TestData::catnip().bytes(),
        Some(callback.clone()),
    );
    let err = corrupted.to_byte_slice(MAX_SIZE).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(*verdicts.lock(), vec![false]);

    // The failure was not cached as a success: the next read validates again.
    let buffer =
        factory.new_buffer_from_byte_slice(&digest, data.bytes(), Some(callback.clone()));
    assert_eq!(buffer.to_byte_slice(MAX_SIZE).await.unwrap(), data.bytes());
    assert_eq!(*verdicts.lock(), vec![false, true]);
}
