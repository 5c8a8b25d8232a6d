// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use hashing::{DigestSetBuilder, Function, InstanceName};
use protos::gen::blobgrid::replicator::replicator_server::Replicator;
use protos::gen::blobgrid::replicator::{ReplicateBlobsRequest, ReplicateBlobsResponse};
use protos::{require_digest, require_digest_function};
use store::replication::BlobReplicator;
use tonic::{Request, Response, Status};

/// The server side of remote replication: peers ask this process to copy blobs between the
/// backends it owns.
pub struct ReplicatorService {
    replicator: Arc<dyn BlobReplicator>,
}

impl ReplicatorService {
    pub fn new(replicator: Arc<dyn BlobReplicator>) -> ReplicatorService {
        ReplicatorService { replicator }
    }
}

#[tonic::async_trait]
impl Replicator for ReplicatorService {
    async fn replicate_blobs(
        &self,
        request: Request<ReplicateBlobsRequest>,
    ) -> Result<Response<ReplicateBlobsResponse>, Status> {
        let request = request.into_inner();
        let function = Function::new(
            InstanceName::new(request.instance_name)?,
            require_digest_function(request.digest_function)?,
        );
        let mut builder = DigestSetBuilder::new();
        for wire_digest in &request.blob_digests {
            builder.add(require_digest(&function, wire_digest)?);
        }
        self.replicator.replicate_multiple(builder.build()).await?;
        Ok(Response::new(ReplicateBlobsResponse {}))
    }
}
