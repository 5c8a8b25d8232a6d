// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use async_trait::async_trait;
use buffer::{Buffer, ErrorHandler};
use grpc_util::prefix_status;
use hashing::{Digest, DigestSet, InstanceName};
use protos::gen::build::bazel::remote::execution::v2::ServerCapabilities;
use tonic::{Code, Status};

use crate::replication::BlobReplicator;
use crate::{BlobAccess, BlobSlicer};

struct PrefixingErrorHandler {
    prefix: &'static str,
}

#[async_trait]
impl ErrorHandler for PrefixingErrorHandler {
    async fn on_error(&mut self, err: Status) -> Result<Buffer, Status> {
        Err(prefix_status(self.prefix, err))
    }
}

enum FallbackRead {
    Single(Digest),
    Composite {
        parent_digest: Digest,
        child_digest: Digest,
        slicer: Arc<dyn BlobSlicer>,
    },
}

struct FallbackErrorHandler {
    secondary: Arc<dyn BlobAccess>,
    replicator: Option<Arc<dyn BlobReplicator>>,
    read: FallbackRead,
    engaged: bool,
}

#[async_trait]
impl ErrorHandler for FallbackErrorHandler {
    async fn on_error(&mut self, err: Status) -> Result<Buffer, Status> {
        if self.engaged {
            return Err(err);
        }
        self.engaged = true;
        if err.code() != Code::NotFound {
            return Err(prefix_status("Primary", err));
        }
        let replacement = match (&self.replicator, &self.read) {
            (Some(replicator), FallbackRead::Single(digest)) => {
                replicator.replicate_single(digest).await
            }
            (
                Some(replicator),
                FallbackRead::Composite {
                    parent_digest,
                    child_digest,
                    slicer,
                },
            ) => {
                replicator
                    .replicate_composite(parent_digest, child_digest, slicer.clone())
                    .await
            }
            (None, FallbackRead::Single(digest)) => self.secondary.get(digest).await,
            (
                None,
                FallbackRead::Composite {
                    parent_digest,
                    child_digest,
                    slicer,
                },
            ) => {
                self.secondary
                    .get_from_composite(parent_digest, child_digest, slicer.clone())
                    .await
            }
        };
        Ok(replacement.with_error_handler(Box::new(PrefixingErrorHandler {
            prefix: "Secondary",
        })))
    }
}

///
/// Composes a primary backend with a secondary one that only serves reads, e.g. the storage
/// of an older generation of the service. `get` falls back to the secondary on NotFound;
/// with a replicator configured, blobs observed to exist only in the secondary are copied
/// into the primary so that the secondary can eventually be drained.
///
/// Errors are prefixed with the tier that produced them, as the same code coming from either
/// side would otherwise be indistinguishable.
///
pub struct ReadFallbackBlobAccess {
    primary: Arc<dyn BlobAccess>,
    secondary: Arc<dyn BlobAccess>,
    replicator: Option<Arc<dyn BlobReplicator>>,
}

impl ReadFallbackBlobAccess {
    pub fn new(
        primary: Arc<dyn BlobAccess>,
        secondary: Arc<dyn BlobAccess>,
        replicator: Option<Arc<dyn BlobReplicator>>,
    ) -> ReadFallbackBlobAccess {
        ReadFallbackBlobAccess {
            primary,
            secondary,
            replicator,
        }
    }

    fn fallback_handler(&self, read: FallbackRead) -> Box<FallbackErrorHandler> {
        Box::new(FallbackErrorHandler {
            secondary: self.secondary.clone(),
            replicator: self.replicator.clone(),
            read,
            engaged: false,
        })
    }
}

#[async_trait]
impl BlobAccess for ReadFallbackBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let buffer = self.primary.get(digest).await;
        buffer.with_error_handler(self.fallback_handler(FallbackRead::Single(digest.clone())))
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let buffer = self
            .primary
            .get_from_composite(parent_digest, child_digest, slicer.clone())
            .await;
        buffer.with_error_handler(self.fallback_handler(FallbackRead::Composite {
            parent_digest: parent_digest.clone(),
            child_digest: child_digest.clone(),
            slicer,
        }))
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        self.primary.put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        let missing_in_primary = self
            .primary
            .find_missing(digests)
            .await
            .map_err(|err| prefix_status("Primary", err))?;
        if missing_in_primary.is_empty() {
            return Ok(missing_in_primary);
        }
        // The secondary only needs to be consulted for what the primary does not have.
        let missing_everywhere = self
            .secondary
            .find_missing(missing_in_primary.clone())
            .await
            .map_err(|err| prefix_status("Secondary", err))?;
        if let Some(replicator) = &self.replicator {
            let (present_only_in_secondary, _) =
                missing_in_primary.difference_and_intersection(&missing_everywhere);
            if !present_only_in_secondary.is_empty() {
                replicator
                    .replicate_multiple(present_only_in_secondary)
                    .await?;
            }
        }
        Ok(missing_everywhere)
    }

    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        self.primary.get_capabilities(instance_name).await
    }
}
