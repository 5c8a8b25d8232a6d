// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use buffer::Buffer;
use bytes::Bytes;
use hashing::{Digest, DigestSet, DigestSetBuilder, InstanceName};
use store::BlobAccess;
use task_executor::Executor;
use testutil::data::{sha256_function, TestData};
use tonic::{Code, Status};

use crate::blob_access::WideColumnBlobAccess;
use crate::{
    ConsistencyLevel, MemoryWideColumnClient, MetadataKey, MetadataRow, OrphanRow,
    WideColumnClient,
};

const SEGMENT_SIZE: u32 = 64;
const MAX_SIZE: usize = 100 * 1024 * 1024;

fn new_engine(client: Arc<dyn WideColumnClient>) -> WideColumnBlobAccess {
    WideColumnBlobAccess::new(client, &Executor::new(), SEGMENT_SIZE, Duration::from_secs(60))
}

async fn put_bytes(engine: &WideColumnBlobAccess, digest: &Digest, data: Bytes) {
    engine
        .put(digest, Buffer::from_validated_bytes(data))
        .await
        .expect("Put failed");
}

#[tokio::test]
async fn put_then_get_round_trips_across_segments() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client.clone());

    // 200 bytes with a 64 byte segment size: four segments.
    let data = TestData::new(&"x".repeat(200));
    let function = sha256_function("acme");
    let digest = data.digest(&function);
    put_bytes(&engine, &digest, data.bytes()).await;
    assert_eq!(client.segment_count(), 4);

    let fetched = engine.get(&digest).await.to_byte_slice(MAX_SIZE).await.unwrap();
    assert_eq!(fetched, data.bytes());
}

#[tokio::test]
async fn metadata_records_the_segment_layout() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client.clone());
    let data = TestData::new(&"x".repeat(65));
    let function = sha256_function("");
    let digest = data.digest(&function);
    put_bytes(&engine, &digest, data.bytes()).await;

    let row = client
        .metadata_row(&MetadataKey::for_digest(&digest, &InstanceName::empty()))
        .unwrap();
    assert_eq!(row.segment_count, 2);
    assert_eq!(row.segment_size, SEGMENT_SIZE);
    assert!(!row.blob_id.is_empty());
}

#[tokio::test]
async fn get_of_an_absent_blob_is_not_found() {
    let engine = new_engine(Arc::new(MemoryWideColumnClient::new()));
    let digest = TestData::hello().digest(&sha256_function(""));
    let err = engine
        .get(&digest)
        .await
        .to_byte_slice(MAX_SIZE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn the_universal_pool_serves_every_instance_name() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client);
    let data = TestData::hello();
    // Stored under the empty instance name, read under a scoped one.
    put_bytes(&engine, &data.digest(&sha256_function("")), data.bytes()).await;
    let fetched = engine
        .get(&data.digest(&sha256_function("acme/prod")))
        .await
        .to_byte_slice(MAX_SIZE)
        .await
        .unwrap();
    assert_eq!(fetched, data.bytes());
}

#[tokio::test]
async fn instance_names_share_content_rows() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client.clone());
    let data = TestData::new(&"x".repeat(200));

    put_bytes(&engine, &data.digest(&sha256_function("acme")), data.bytes()).await;
    let segments_after_first_put = client.segment_count();
    assert_eq!(segments_after_first_put, 4);

    // The same content under another instance name reuses the existing segments: only a
    // second metadata row is written, and no orphan row is needed since no segments are
    // ever in flight.
    put_bytes(&engine, &data.digest(&sha256_function("zork")), data.bytes()).await;
    assert_eq!(client.segment_count(), segments_after_first_put);
    assert_eq!(client.orphan_count(), 0);

    let acme_row = client
        .metadata_row(&MetadataKey::for_digest(
            &data.digest(&sha256_function("acme")),
            &InstanceName::new("acme").unwrap(),
        ))
        .unwrap();
    let zork_row = client
        .metadata_row(&MetadataKey::for_digest(
            &data.digest(&sha256_function("zork")),
            &InstanceName::new("zork").unwrap(),
        ))
        .unwrap();
    assert_eq!(acme_row.blob_id, zork_row.blob_id);

    // Both scoped reads serve the shared content.
    for instance_name in ["acme", "zork"] {
        let fetched = engine
            .get(&data.digest(&sha256_function(instance_name)))
            .await
            .to_byte_slice(MAX_SIZE)
            .await
            .unwrap();
        assert_eq!(fetched, data.bytes());
    }
}

#[tokio::test]
async fn retried_uploads_skip_the_content_upload() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client.clone());
    let data = TestData::new(&"x".repeat(130));
    put_bytes(&engine, &data.digest(&sha256_function("acme")), data.bytes()).await;
    let segments_after_first_put = client.segment_count();

    // The final segment exists, so the second upload only rewrites metadata. With no
    // segments in flight, no orphan row is needed either.
    put_bytes(&engine, &data.digest(&sha256_function("acme")), data.bytes()).await;
    assert_eq!(client.segment_count(), segments_after_first_put);
    assert_eq!(client.orphan_count(), 0);
}

#[tokio::test]
async fn orphan_rows_only_exist_during_the_upload() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client.clone());
    let data = TestData::new(&"x".repeat(200));
    put_bytes(&engine, &data.digest(&sha256_function("")), data.bytes()).await;
    assert_eq!(client.orphan_count(), 0);
}

#[tokio::test]
async fn empty_blobs_round_trip_without_segments() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client.clone());
    let function = sha256_function("");
    let digest = function.empty_digest();
    put_bytes(&engine, &digest, Bytes::new()).await;
    assert_eq!(client.segment_count(), 0);
    let fetched = engine.get(&digest).await.to_byte_slice(MAX_SIZE).await.unwrap();
    assert!(fetched.is_empty());
}

#[tokio::test]
async fn find_missing_reports_only_absent_digests() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client);
    let function = sha256_function("");
    let present = TestData::hello();
    let absent = TestData::catnip();
    put_bytes(&engine, &present.digest(&function), present.bytes()).await;

    let mut builder = DigestSetBuilder::new();
    builder.add(present.digest(&function));
    builder.add(absent.digest(&function));
    let missing = engine.find_missing(builder.build()).await.unwrap();
    assert_eq!(missing, DigestSet::single(absent.digest(&function)));
}

#[tokio::test]
async fn corrupted_segments_surface_internal_and_evict_the_metadata() {
    let client = Arc::new(MemoryWideColumnClient::new());
    let engine = new_engine(client.clone());
    let data = TestData::new(&"x".repeat(100));
    let function = sha256_function("");
    let digest = data.digest(&function);
    put_bytes(&engine, &digest, data.bytes()).await;

    let key = MetadataKey::for_digest(&digest, &InstanceName::empty());
    let blob_id = client.metadata_row(&key).unwrap().blob_id;
    client.corrupt_segment(&blob_id, 0, Bytes::from(vec![0u8; 64]));

    let err = engine
        .get(&digest)
        .await
        .to_byte_slice(MAX_SIZE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);

    // The reparation hook evicts the metadata row in the background.
    for _ in 0..100 {
        if client.metadata_row(&key).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(client.metadata_row(&key).is_none());
}

/// Fails the first `failures` metadata writes with a transient error.
struct FlakyMetadataClient {
    inner: MemoryWideColumnClient,
    remaining_failures: AtomicUsize,
    write_attempts: AtomicUsize,
}

#[async_trait]
impl WideColumnClient for FlakyMetadataClient {
    async fn read_metadata(
        &self,
        key: &MetadataKey,
        consistency: ConsistencyLevel,
    ) -> Result<Option<MetadataRow>, Status> {
        self.inner.read_metadata(key, consistency).await
    }

    async fn write_metadata(
        &self,
        row: &MetadataRow,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Status::unavailable("Coordinator timed out"));
        }
        self.inner.write_metadata(row, consistency).await
    }

    async fn delete_metadata(
        &self,
        key: &MetadataKey,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.inner.delete_metadata(key, consistency).await
    }

    async fn update_last_access(
        &self,
        key: &MetadataKey,
        last_access: i64,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.inner.update_last_access(key, last_access, consistency).await
    }

    async fn read_segment(
        &self,
        blob_id: &str,
        segment: u32,
        consistency: ConsistencyLevel,
    ) -> Result<Option<Bytes>, Status> {
        self.inner.read_segment(blob_id, segment, consistency).await
    }

    async fn segment_exists(
        &self,
        blob_id: &str,
        segment: u32,
        consistency: ConsistencyLevel,
    ) -> Result<bool, Status> {
        self.inner.segment_exists(blob_id, segment, consistency).await
    }

    async fn write_segment(
        &self,
        blob_id: &str,
        segment: u32,
        content: Bytes,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.inner
            .write_segment(blob_id, segment, content, consistency)
            .await
    }

    async fn write_orphan(
        &self,
        row: &OrphanRow,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.inner.write_orphan(row, consistency).await
    }

    async fn delete_orphan(
        &self,
        blob_id: &str,
        digest_instance_name: &str,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.inner
            .delete_orphan(blob_id, digest_instance_name, consistency)
            .await
    }
}

#[tokio::test(start_paused = true)]
async fn transient_metadata_write_failures_are_retried() {
    let client = Arc::new(FlakyMetadataClient {
        inner: MemoryWideColumnClient::new(),
        remaining_failures: AtomicUsize::new(2),
        write_attempts: AtomicUsize::new(0),
    });
    let engine = new_engine(client.clone());
    let data = TestData::hello();
    let function = sha256_function("");
    let digest = data.digest(&function);

    put_bytes(&engine, &digest, data.bytes()).await;
    assert_eq!(client.write_attempts.load(Ordering::SeqCst), 3);
    assert!(client
        .inner
        .metadata_row(&MetadataKey::for_digest(&digest, &InstanceName::empty()))
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn metadata_write_failures_surface_after_the_last_retry() {
    let client = Arc::new(FlakyMetadataClient {
        inner: MemoryWideColumnClient::new(),
        remaining_failures: AtomicUsize::new(usize::MAX),
        write_attempts: AtomicUsize::new(0),
    });
    let engine = new_engine(client.clone());
    let data = TestData::hello();
    let digest = data.digest(&sha256_function(""));

    let err = engine
        .put(&digest, Buffer::from_validated_bytes(data.bytes()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(client.write_attempts.load(Ordering::SeqCst), 3);
    // The orphan row was still cleaned up on exit.
    assert_eq!(client.inner.orphan_count(), 0);
}
