// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use hashing::{Digest, DigestSet, InstanceName};
use protos::gen::build::bazel::remote::execution::v2::ServerCapabilities;
use tonic::{Code, Status};

use crate::replication::{
    get_composite_with_blob_replicator, get_with_blob_replicator, BlobReplicator,
    BlobReplicatorSelector,
};
use crate::{BlobAccess, BlobSlicer};

///
/// Composes a fast backend (e.g. local) with a slow backend (e.g. remote). Reads are served
/// from the fast backend; misses are populated from the slow backend through a replicator.
/// Writes and existence checks go to the slow backend, which is the source of truth.
///
pub struct ReadCachingBlobAccess {
    fast: Arc<dyn BlobAccess>,
    slow: Arc<dyn BlobAccess>,
    replicator: Arc<dyn BlobReplicator>,
}

impl ReadCachingBlobAccess {
    pub fn new(
        fast: Arc<dyn BlobAccess>,
        slow: Arc<dyn BlobAccess>,
        replicator: Arc<dyn BlobReplicator>,
    ) -> ReadCachingBlobAccess {
        ReadCachingBlobAccess {
            fast,
            slow,
            replicator,
        }
    }

    fn replicate_on_not_found(&self) -> BlobReplicatorSelector {
        let replicator = self.replicator.clone();
        Box::new(move |err| {
            if err.code() == Code::NotFound {
                Ok(replicator.clone())
            } else {
                Err(err.clone())
            }
        })
    }
}

#[async_trait]
impl BlobAccess for ReadCachingBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let buffer = self.fast.get(digest).await;
        get_with_blob_replicator(buffer, digest.clone(), self.replicate_on_not_found())
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let buffer = self
            .fast
            .get_from_composite(parent_digest, child_digest, slicer.clone())
            .await;
        // On a miss the whole parent is replicated and the retried read slices it again.
        get_composite_with_blob_replicator(
            buffer,
            parent_digest.clone(),
            child_digest.clone(),
            slicer,
            self.replicate_on_not_found(),
        )
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        self.slow.put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        self.slow.find_missing(digests).await
    }

    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        self.slow.get_capabilities(instance_name).await
    }
}
