// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use hashing::{Digest, DigestSet};
use tonic::Status;

use crate::replication::BlobReplicator;
use crate::{BlobAccess, BlobSlicer};

///
/// Performs no replication at all: reads are served straight from the source. Used where a
/// topology wants the replicator seam without actually copying, e.g. a read-only mirror.
///
pub struct NoopBlobReplicator {
    source: Arc<dyn BlobAccess>,
}

impl NoopBlobReplicator {
    pub fn new(source: Arc<dyn BlobAccess>) -> NoopBlobReplicator {
        NoopBlobReplicator { source }
    }
}

#[async_trait]
impl BlobReplicator for NoopBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        self.source.get(digest).await
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        self.source
            .get_from_composite(parent_digest, child_digest, slicer)
            .await
    }

    async fn replicate_multiple(&self, _digests: DigestSet) -> Result<(), Status> {
        Ok(())
    }
}
