// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use hashing::{Digest, DigestSet};
use tokio::sync::Semaphore;
use tonic::Status;

use crate::replication::{
    get_from_composite_from_sink_after_replication, get_from_sink_after_replication,
    BlobReplicator,
};
use crate::{BlobAccess, BlobSlicer};

///
/// Bounds the number of concurrent replications against the base replicator with a semaphore.
///
/// `replicate_single` completes the replication while holding a permit and only then reads
/// the blob back out of the sink, so a slow client cannot pace the replication itself and
/// thereby hold a permit for an unbounded amount of time.
///
pub struct ConcurrencyLimitingBlobReplicator {
    base: Arc<dyn BlobReplicator>,
    sink: Arc<dyn BlobAccess>,
    semaphore: Semaphore,
}

impl ConcurrencyLimitingBlobReplicator {
    pub fn new(
        base: Arc<dyn BlobReplicator>,
        sink: Arc<dyn BlobAccess>,
        maximum_concurrency: usize,
    ) -> ConcurrencyLimitingBlobReplicator {
        ConcurrencyLimitingBlobReplicator {
            base,
            sink,
            semaphore: Semaphore::new(maximum_concurrency),
        }
    }

    async fn replicate_limited(&self, digests: DigestSet) -> Result<(), Status> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| Status::internal("Replication limiter was shut down"))?;
        self.base.replicate_multiple(digests).await
    }
}

#[async_trait]
impl BlobReplicator for ConcurrencyLimitingBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        if let Err(err) = self
            .replicate_limited(DigestSet::single(digest.clone()))
            .await
        {
            return Buffer::from_error(err);
        }
        get_from_sink_after_replication(&self.sink, digest).await
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        if let Err(err) = self
            .replicate_limited(DigestSet::single(parent_digest.clone()))
            .await
        {
            return Buffer::from_error(err);
        }
        get_from_composite_from_sink_after_replication(
            &self.sink,
            parent_digest,
            child_digest,
            slicer,
        )
        .await
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status> {
        self.replicate_limited(digests).await
    }
}
