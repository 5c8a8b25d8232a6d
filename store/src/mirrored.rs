// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use buffer::{Buffer, ErrorHandler};
use futures::future;
use grpc_util::prefix_status;
use hashing::{Digest, DigestSet, InstanceName};
use protos::gen::build::bazel::remote::execution::v2::ServerCapabilities;
use tonic::{Code, Status};

use crate::replication::BlobReplicator;
use crate::{merge_capabilities, BlobAccess, BlobSlicer};

enum MirroredRead {
    Single(Digest),
    Composite {
        parent_digest: Digest,
        child_digest: Digest,
        slicer: Arc<dyn BlobSlicer>,
    },
}

struct MirroredErrorHandler {
    first_name: &'static str,
    other_name: &'static str,
    replicator_from_other: Arc<dyn BlobReplicator>,
    read: MirroredRead,
    engaged: bool,
}

#[async_trait]
impl ErrorHandler for MirroredErrorHandler {
    async fn on_error(&mut self, err: Status) -> Result<Buffer, Status> {
        if self.engaged {
            return Err(prefix_status(self.other_name, err));
        }
        self.engaged = true;
        if err.code() != Code::NotFound {
            return Err(prefix_status(self.first_name, err));
        }
        // Absent on the side we asked first; the other side repairs the mirror.
        let replacement = match &self.read {
            MirroredRead::Single(digest) => {
                self.replicator_from_other.replicate_single(digest).await
            }
            MirroredRead::Composite {
                parent_digest,
                child_digest,
                slicer,
            } => {
                self.replicator_from_other
                    .replicate_composite(parent_digest, child_digest, slicer.clone())
                    .await
            }
        };
        Ok(replacement)
    }
}

///
/// Keeps two backends identical: writes go to both sides, and a read that misses on one side
/// is served by replicating the blob from the other. Reads alternate between the sides for
/// load spreading. Errors carry the name of the side that produced them.
///
pub struct MirroredBlobAccess {
    backend_a: Arc<dyn BlobAccess>,
    backend_b: Arc<dyn BlobAccess>,
    replicator_a_to_b: Arc<dyn BlobReplicator>,
    replicator_b_to_a: Arc<dyn BlobReplicator>,
    round_robin: AtomicUsize,
}

impl MirroredBlobAccess {
    pub fn new(
        backend_a: Arc<dyn BlobAccess>,
        backend_b: Arc<dyn BlobAccess>,
        replicator_a_to_b: Arc<dyn BlobReplicator>,
        replicator_b_to_a: Arc<dyn BlobReplicator>,
    ) -> MirroredBlobAccess {
        MirroredBlobAccess {
            backend_a,
            backend_b,
            replicator_a_to_b,
            replicator_b_to_a,
            round_robin: AtomicUsize::new(0),
        }
    }

    #[allow(clippy::type_complexity)]
    fn pick_first(
        &self,
    ) -> (
        &Arc<dyn BlobAccess>,
        &'static str,
        &Arc<dyn BlobReplicator>,
        &'static str,
    ) {
        if self.round_robin.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
            (
                &self.backend_a,
                "Backend A",
                &self.replicator_b_to_a,
                "Backend B",
            )
        } else {
            (
                &self.backend_b,
                "Backend B",
                &self.replicator_a_to_b,
                "Backend A",
            )
        }
    }
}

#[async_trait]
impl BlobAccess for MirroredBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let (first, first_name, replicator_from_other, other_name) = self.pick_first();
        let buffer = first.get(digest).await;
        buffer.with_error_handler(Box::new(MirroredErrorHandler {
            first_name,
            other_name,
            replicator_from_other: replicator_from_other.clone(),
            read: MirroredRead::Single(digest.clone()),
            engaged: false,
        }))
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let (first, first_name, replicator_from_other, other_name) = self.pick_first();
        let buffer = first
            .get_from_composite(parent_digest, child_digest, slicer.clone())
            .await;
        buffer.with_error_handler(Box::new(MirroredErrorHandler {
            first_name,
            other_name,
            replicator_from_other: replicator_from_other.clone(),
            read: MirroredRead::Composite {
                parent_digest: parent_digest.clone(),
                child_digest: child_digest.clone(),
                slicer,
            },
            engaged: false,
        }))
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        let (for_a, for_b) = buffer.clone_stream();
        let (result_a, result_b) = future::join(
            self.backend_a.put(digest, for_a),
            self.backend_b.put(digest, for_b),
        )
        .await;
        result_a.map_err(|err| prefix_status("Backend A", err))?;
        result_b.map_err(|err| prefix_status("Backend B", err))?;
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        let (missing_a, missing_b) = future::join(
            self.backend_a.find_missing(digests.clone()),
            self.backend_b.find_missing(digests),
        )
        .await;
        let missing_a = missing_a.map_err(|err| prefix_status("Backend A", err))?;
        let missing_b = missing_b.map_err(|err| prefix_status("Backend B", err))?;

        // Digests present on exactly one side get copied to the other, so both sides stay
        // identical. Only blobs absent from both sides are reported missing.
        let (present_only_in_b, missing_everywhere) =
            missing_a.difference_and_intersection(&missing_b);
        let (present_only_in_a, _) = missing_b.difference_and_intersection(&missing_a);
        if !present_only_in_b.is_empty() {
            self.replicator_b_to_a
                .replicate_multiple(present_only_in_b)
                .await?;
        }
        if !present_only_in_a.is_empty() {
            self.replicator_a_to_b
                .replicate_multiple(present_only_in_a)
                .await?;
        }
        Ok(missing_everywhere)
    }

    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        let (capabilities_a, capabilities_b) = future::join(
            self.backend_a.get_capabilities(instance_name),
            self.backend_b.get_capabilities(instance_name),
        )
        .await;
        Ok(merge_capabilities(&capabilities_a?, &capabilities_b?))
    }
}
