// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use cache::ExistenceCache;
use hashing::{Digest, DigestSet};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tonic::Status;

use crate::replication::BlobReplicator;
use crate::{BlobAccess, BlobSlicer};

struct Inner {
    source: Arc<dyn BlobAccess>,
    base: Arc<dyn BlobReplicator>,
    cache: Mutex<ExistenceCache>,
    slot: Semaphore,
}

impl Inner {
    async fn replicate(&self, digests: DigestSet) -> Result<(), Status> {
        let needed = self.cache.lock().remove_existing(&digests);
        if needed.is_empty() {
            return Ok(());
        }
        let _permit = self
            .slot
            .acquire()
            .await
            .map_err(|_| Status::internal("Replication queue was shut down"))?;
        // Re-check under the slot: the replication we queued behind may have covered these.
        let needed = self.cache.lock().remove_existing(&needed);
        if needed.is_empty() {
            return Ok(());
        }
        self.base.replicate_multiple(needed.clone()).await?;
        self.cache.lock().add(&needed);
        Ok(())
    }
}

///
/// Serializes replication through a single slot, with an existence cache in front so that a
/// blob replicated recently is not replicated again. Reads performed by `replicate_single`
/// go to the source directly, in parallel with the queued background replication, so readers
/// are not stalled behind the queue.
///
pub struct QueuedBlobReplicator {
    inner: Arc<Inner>,
}

impl QueuedBlobReplicator {
    pub fn new(
        source: Arc<dyn BlobAccess>,
        base: Arc<dyn BlobReplicator>,
        existence_cache: ExistenceCache,
    ) -> QueuedBlobReplicator {
        QueuedBlobReplicator {
            inner: Arc::new(Inner {
                source,
                base,
                cache: Mutex::new(existence_cache),
                slot: Semaphore::new(1),
            }),
        }
    }
}

#[async_trait]
impl BlobReplicator for QueuedBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        let inner = self.inner.clone();
        let digests = DigestSet::single(digest.clone());
        let buffer = self.inner.source.get(digest).await;
        buffer.with_background_task(async move { inner.replicate(digests).await })
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let inner = self.inner.clone();
        let digests = DigestSet::single(parent_digest.clone());
        let buffer = self
            .inner
            .source
            .get_from_composite(parent_digest, child_digest, slicer)
            .await;
        buffer.with_background_task(async move { inner.replicate(digests).await })
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status> {
        self.inner.replicate(digests).await
    }
}
