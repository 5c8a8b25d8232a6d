// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use grpc_util::retry::{retry_call, status_is_retryable};
use hashing::{Digest, DigestFunction, DigestSet};
use protos::digest_function_to_wire;
use protos::gen::blobgrid::replicator::replicator_client::ReplicatorClient;
use protos::gen::blobgrid::replicator::ReplicateBlobsRequest;
use tonic::transport::Channel;
use tonic::Status;

use crate::replication::BlobReplicator;
use crate::{BlobAccess, BlobSlicer};

///
/// Delegates the actual copying to a replicator service running elsewhere, so that one
/// process performs each copy globally. Reads are served from the source backend; the
/// service is told to replicate asynchronously, as a background task of the returned Buffer.
///
#[derive(Clone)]
pub struct RemoteBlobReplicator {
    source: Arc<dyn BlobAccess>,
    client: ReplicatorClient<Channel>,
}

impl RemoteBlobReplicator {
    pub fn new(source: Arc<dyn BlobAccess>, channel: Channel) -> RemoteBlobReplicator {
        RemoteBlobReplicator {
            source,
            client: ReplicatorClient::new(channel),
        }
    }

    async fn replicate_remotely(&self, digests: DigestSet) -> Result<(), Status> {
        // One request per (instance name, digest function) pair, which is all a single
        // request can express.
        for (instance_name, digests) in digests.partition_by_instance_name() {
            let mut by_function: HashMap<DigestFunction, Vec<&Digest>> = HashMap::new();
            for digest in &digests {
                by_function
                    .entry(digest.digest_function())
                    .or_default()
                    .push(digest);
            }
            for (digest_function, digests) in by_function {
                let request = ReplicateBlobsRequest {
                    instance_name: instance_name.as_str().to_owned(),
                    blob_digests: digests.iter().map(|d| (*d).into()).collect(),
                    digest_function: digest_function_to_wire(digest_function),
                };
                retry_call(
                    self.client.clone(),
                    |mut client, _| {
                        let request = request.clone();
                        async move { client.replicate_blobs(request).await }
                    },
                    status_is_retryable,
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobReplicator for RemoteBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        let this = self.clone();
        let digests = DigestSet::single(digest.clone());
        let buffer = self.source.get(digest).await;
        buffer.with_background_task(async move { this.replicate_remotely(digests).await })
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let this = self.clone();
        let digests = DigestSet::single(parent_digest.clone());
        let buffer = self
            .source
            .get_from_composite(parent_digest, child_digest, slicer)
            .await;
        buffer.with_background_task(async move { this.replicate_remotely(digests).await })
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status> {
        self.replicate_remotely(digests).await
    }
}
