// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use buffer::{Buffer, BufferSource, ChunkReader, DataIntegrityCallback};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use grpc_util::retry::status_is_retryable;
use hashing::{Digest, DigestSet, DigestSetBuilder, InstanceName};
use protos::gen::build::bazel::remote::execution::v2::ServerCapabilities;
use store::{
    get_from_composite_via_get, local_capabilities, BlobAccess, BlobAccessKind, BlobSlicer,
};
use task_executor::Executor;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_retry2::strategy::{jitter, ExponentialBackoff};
use tokio_retry2::{Retry, RetryError};
use tonic::Status;

use crate::{ConsistencyLevel, MetadataKey, MetadataRow, OrphanRow, WideColumnClient};

/// Upper bound on concurrently in-flight segment writes of a single Put.
const SEGMENT_WRITE_CONCURRENCY: usize = 100;

/// Upper bound on concurrently in-flight metadata lookups of a single FindMissing.
const FIND_MISSING_CONCURRENCY: usize = 100;

/// Last-access updates beyond this backlog are dropped rather than queued.
const LAST_ACCESS_QUEUE_CAPACITY: usize = 1024;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Fetches segments `0 .. segment_count` one at a time. A missing segment is an internal
/// error: once metadata names a segment count, all of those segments are durable.
struct SegmentChunkReader {
    client: Arc<dyn WideColumnClient>,
    blob_id: String,
    segment_count: u32,
    next_segment: u32,
}

#[async_trait]
impl ChunkReader for SegmentChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if self.next_segment >= self.segment_count {
            return Ok(None);
        }
        match self
            .client
            .read_segment(&self.blob_id, self.next_segment, ConsistencyLevel::LocalQuorum)
            .await?
        {
            Some(data) => {
                self.next_segment += 1;
                Ok(Some(data))
            }
            None => Err(Status::internal(format!(
                "Segment {} of blob {} is missing",
                self.next_segment, self.blob_id
            ))),
        }
    }
}

///
/// Stores blobs segmented across the rows of a wide-column database.
///
/// A blob is identified by a stable blob id derived from its digest, without the instance
/// name. Its contents live in the content table as `segment_count` rows of up to
/// `segment_size_bytes` each; the metadata table points at them per instance name. Because
/// identical content yields an identical blob id, uploads of the same blob under different
/// instance names (as well as retried and concurrent uploads) converge on one set of
/// segment rows, and reads additionally probe the universal pool before the scoped one so
/// that blobs uploaded under the empty instance name serve every tenant.
///
pub struct WideColumnBlobAccess {
    client: Arc<dyn WideColumnClient>,
    segment_size_bytes: u32,
    last_access_update_interval: Duration,
    last_access_queue: mpsc::Sender<(MetadataKey, i64)>,
}

impl WideColumnBlobAccess {
    ///
    /// `segment_size_bytes` must fit comfortably under the database's per-row size limit.
    /// Reads within `last_access_update_interval` of the recorded last access do not touch
    /// the metadata table again.
    ///
    pub fn new(
        client: Arc<dyn WideColumnClient>,
        executor: &Executor,
        segment_size_bytes: u32,
        last_access_update_interval: Duration,
    ) -> WideColumnBlobAccess {
        let (last_access_queue, mut receiver) =
            mpsc::channel::<(MetadataKey, i64)>(LAST_ACCESS_QUEUE_CAPACITY);
        let worker_client = client.clone();
        // The one long-lived background task of the engine; it dies with the channel.
        executor.native_spawn(async move {
            while let Some((key, last_access)) = receiver.recv().await {
                if let Err(err) = worker_client
                    .update_last_access(&key, last_access, ConsistencyLevel::One)
                    .await
                {
                    log::debug!(
                        "Failed to update last access of blob {}: {}",
                        key.digest_hash,
                        err
                    );
                }
            }
        });
        WideColumnBlobAccess {
            client,
            segment_size_bytes,
            last_access_update_interval,
            last_access_queue,
        }
    }

    /// The content rows are keyed by the digest alone, without the instance name: identical
    /// content uploaded under any number of instance names occupies one set of segments,
    /// referenced by one metadata row per name.
    fn blob_id(digest: &Digest) -> String {
        format!(
            "{}-{}-{}",
            digest.digest_function().name(),
            digest.hash().to_hex(),
            digest.size_bytes()
        )
    }

    fn segment_count(&self, size_bytes: u64) -> u32 {
        size_bytes.div_ceil(u64::from(self.segment_size_bytes)) as u32
    }

    ///
    /// Reads the metadata row for a digest, probing the universal (empty instance name) pool
    /// before the scoped one. A row with an empty blob id counts as absent.
    ///
    async fn metadata_lookup(
        &self,
        digest: &Digest,
    ) -> Result<Option<(MetadataKey, MetadataRow)>, Status> {
        if !digest.instance_name().is_empty() {
            let key = MetadataKey::for_digest(digest, &InstanceName::empty());
            if let Some(row) = self
                .client
                .read_metadata(&key, ConsistencyLevel::LocalQuorum)
                .await?
            {
                if !row.blob_id.is_empty() {
                    return Ok(Some((key, row)));
                }
            }
        }
        let key = MetadataKey::for_digest(digest, digest.instance_name());
        match self
            .client
            .read_metadata(&key, ConsistencyLevel::LocalQuorum)
            .await?
        {
            Some(row) if !row.blob_id.is_empty() => Ok(Some((key, row))),
            _ => Ok(None),
        }
    }

    async fn spawn_segment_write(
        &self,
        semaphore: &Arc<Semaphore>,
        writes: &mut JoinSet<Result<(), Status>>,
        blob_id: &str,
        segment: u32,
        content: Bytes,
    ) -> Result<(), Status> {
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Status::internal("Segment write pool was shut down"))?;
        let client = self.client.clone();
        let blob_id = blob_id.to_owned();
        writes.spawn(async move {
            let _permit = permit;
            client
                .write_segment(&blob_id, segment, content, ConsistencyLevel::LocalQuorum)
                .await
        });
        Ok(())
    }

    /// Consumes the buffer into exact-size segment rows, with a bounded number of writes in
    /// flight. Dropping the JoinSet on an error aborts whatever is still outstanding.
    async fn upload_segments(
        &self,
        blob_id: &str,
        buffer: Buffer,
        segment_count: u32,
    ) -> Result<(), Status> {
        let segment_size = self.segment_size_bytes as usize;
        let mut reader = buffer.to_chunk_reader(0, segment_size);
        let semaphore = Arc::new(Semaphore::new(SEGMENT_WRITE_CONCURRENCY));
        let mut writes: JoinSet<Result<(), Status>> = JoinSet::new();
        let mut pending = BytesMut::with_capacity(segment_size);
        let mut next_segment: u32 = 0;

        while let Some(data) = reader.read().await? {
            pending.extend_from_slice(&data);
            while pending.len() >= segment_size {
                let content = pending.split_to(segment_size).freeze();
                self.spawn_segment_write(&semaphore, &mut writes, blob_id, next_segment, content)
                    .await?;
                next_segment += 1;
            }
        }
        if !pending.is_empty() {
            let content = pending.freeze();
            self.spawn_segment_write(&semaphore, &mut writes, blob_id, next_segment, content)
                .await?;
            next_segment += 1;
        }
        while let Some(result) = writes.join_next().await {
            result.map_err(|err| Status::internal(format!("Segment write panicked: {err}")))??;
        }
        if next_segment != segment_count {
            return Err(Status::internal(format!(
                "Wrote {next_segment} segments, while {segment_count} were expected"
            )));
        }
        Ok(())
    }

    ///
    /// Commits the metadata row at cross-datacenter consistency, retrying transient write
    /// failures a few times with jittered backoff. Colliding writers are harmless: a digest
    /// match means the content is byte-identical, so the rows they write are equivalent.
    ///
    async fn commit_metadata(&self, row: &MetadataRow) -> Result<(), Status> {
        let strategy = ExponentialBackoff::from_millis(500)
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(2);
        Retry::spawn(strategy, || async {
            self.client
                .write_metadata(row, ConsistencyLevel::EachQuorum)
                .await
                .map_err(|err| {
                    if status_is_retryable(&err) {
                        RetryError::transient(err)
                    } else {
                        RetryError::permanent(err)
                    }
                })
        })
        .await
    }
}

#[async_trait]
impl BlobAccess for WideColumnBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let (key, row) = match self.metadata_lookup(digest).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                return Buffer::from_error(Status::not_found(format!(
                    "Blob {digest} does not exist"
                )))
            }
            Err(err) => return Buffer::from_error(err),
        };

        let now = now_millis();
        if now.saturating_sub(row.last_access) >= self.last_access_update_interval.as_millis() as i64
        {
            // Lossy by design of the channel: when the queue is full the update is dropped,
            // and the blob either ages out or gets recorded by a later read.
            let _ = self.last_access_queue.try_send((key.clone(), now));
        }

        let repair_client = self.client.clone();
        let repair_key = key;
        let callback: DataIntegrityCallback = Arc::new(move |valid| {
            if !valid {
                let client = repair_client.clone();
                let key = repair_key.clone();
                tokio::spawn(async move {
                    if let Err(err) = client
                        .delete_metadata(&key, ConsistencyLevel::LocalQuorum)
                        .await
                    {
                        log::warn!(
                            "Failed to evict metadata of corrupted blob {}: {}",
                            key.digest_hash,
                            err
                        );
                    }
                });
            }
        });
        Buffer::from_cas_chunk_reader(
            digest,
            Box::new(SegmentChunkReader {
                client: self.client.clone(),
                blob_id: row.blob_id,
                segment_count: row.segment_count,
                next_segment: 0,
            }),
            BufferSource::reparable(callback),
        )
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        get_from_composite_via_get(self, parent_digest, child_digest, slicer).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        let blob_id = Self::blob_id(digest);
        let segment_count = self.segment_count(digest.size_bytes());
        let row = MetadataRow {
            key: MetadataKey::for_digest(digest, digest.instance_name()),
            blob_id: blob_id.clone(),
            last_access: now_millis(),
            segment_count,
            segment_size: self.segment_size_bytes,
        };

        // Fast path: when the final segment already exists, the whole content is durable
        // from an earlier upload, either under a different instance name or from a put that
        // was interrupted before it could commit its metadata. Only the metadata needs
        // writing.
        let content_present = if segment_count == 0 {
            true
        } else {
            match self
                .client
                .segment_exists(&blob_id, segment_count - 1, ConsistencyLevel::LocalQuorum)
                .await
            {
                Ok(exists) => exists,
                Err(err) => {
                    buffer.discard();
                    return Err(err);
                }
            }
        };
        if content_present {
            buffer.discard();
            return self.commit_metadata(&row).await;
        }

        // The orphan row marks the upload for external reapers while segments are written;
        // it is removed on every exit below, once the segments are no longer in flight.
        let orphan = OrphanRow {
            blob_id: blob_id.clone(),
            digest_instance_name: digest.instance_name().as_str().to_owned(),
            digest_function: digest.digest_function().name().to_owned(),
            digest_hash: digest.hash().to_hex(),
            digest_size_bytes: digest.size_bytes(),
            segment_count,
            timestamp: now_millis(),
        };
        if let Err(err) = self
            .client
            .write_orphan(&orphan, ConsistencyLevel::LocalQuorum)
            .await
        {
            buffer.discard();
            return Err(err);
        }

        let upload_result = self.upload_segments(&blob_id, buffer, segment_count).await;
        let commit_result = match &upload_result {
            Ok(()) => self.commit_metadata(&row).await,
            Err(_) => Ok(()),
        };
        if let Err(err) = self
            .client
            .delete_orphan(
                &blob_id,
                digest.instance_name().as_str(),
                ConsistencyLevel::LocalQuorum,
            )
            .await
        {
            log::warn!("Failed to delete orphan row of blob {blob_id}: {err}");
        }
        upload_result?;
        commit_result
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        let missing: Vec<Digest> = futures::stream::iter(digests.into_iter().map(|digest| {
            async move {
                let present = self.metadata_lookup(&digest).await?.is_some();
                Ok::<_, Status>((digest, present))
            }
        }))
        .buffer_unordered(FIND_MISSING_CONCURRENCY)
        .try_filter_map(|(digest, present)| async move {
            Ok(if present { None } else { Some(digest) })
        })
        .try_collect()
        .await?;
        let mut builder = DigestSetBuilder::new();
        for digest in missing {
            builder.add(digest);
        }
        Ok(builder.build())
    }

    async fn get_capabilities(
        &self,
        _instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        Ok(local_capabilities(BlobAccessKind::Cas))
    }
}
