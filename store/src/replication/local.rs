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
/// Copies blobs by reading them from the source and writing them into the sink within this
/// process. `replicate_single` clones the source stream, so the caller and the sink share a
/// single read of the source.
///
pub struct LocalBlobReplicator {
    source: Arc<dyn BlobAccess>,
    sink: Arc<dyn BlobAccess>,
}

impl LocalBlobReplicator {
    pub fn new(source: Arc<dyn BlobAccess>, sink: Arc<dyn BlobAccess>) -> LocalBlobReplicator {
        LocalBlobReplicator { source, sink }
    }

    /// Reads the source once, streaming one copy into the sink and handing the other back.
    fn tee_into_sink(&self, digest: &Digest, buffer: Buffer) -> Buffer {
        let (reading, writing) = buffer.clone_stream();
        let sink = self.sink.clone();
        let digest = digest.clone();
        reading.with_background_task(async move { sink.put(&digest, writing).await })
    }
}

#[async_trait]
impl BlobReplicator for LocalBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        let buffer = self.source.get(digest).await;
        self.tee_into_sink(digest, buffer)
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let buffer = self.source.get(parent_digest).await;
        // The sink write starts before slicing, so the shared pump never stalls on an
        // unconsumed copy.
        let reading = self.tee_into_sink(parent_digest, buffer);
        slicer.slice(reading, child_digest).await
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status> {
        for digest in &digests {
            let buffer = self.source.get(digest).await;
            self.sink.put(digest, buffer).await?;
        }
        Ok(())
    }
}
