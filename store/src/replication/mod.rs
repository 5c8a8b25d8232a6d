// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Strategies for copying blobs between BlobAccess tiers. Decorators that need "try here,
//! fall back there, then synchronize" express it by selecting a BlobReplicator; the
//! strategies in this module decide how the actual copying is performed.

use std::sync::Arc;

use async_trait::async_trait;
use buffer::{Buffer, ErrorHandler};
use hashing::{Digest, DigestSet};
use tonic::{Code, Status};

use crate::{BlobAccess, BlobSlicer};

mod concurrency_limiting;
pub use concurrency_limiting::ConcurrencyLimitingBlobReplicator;

mod deduplicating;
pub use deduplicating::DeduplicatingBlobReplicator;

mod local;
pub use local::LocalBlobReplicator;

mod metrics;
pub use metrics::MetricsBlobReplicator;

mod nested;
pub use nested::NestedBlobReplicator;

mod noop;
pub use noop::NoopBlobReplicator;

mod queued;
pub use queued::QueuedBlobReplicator;

mod remote;
pub use remote::RemoteBlobReplicator;


///
/// A strategy for copying blobs from a source backend into a sink backend.
///
#[async_trait]
pub trait BlobReplicator: Send + Sync + 'static {
    /// Replicates one object, handing back a Buffer with its contents.
    async fn replicate_single(&self, digest: &Digest) -> Buffer;

    /// Replicates a composite object, handing back the child slice of it.
    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer;

    /// Replicates a set of objects without returning any contents.
    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status>;
}

///
/// Chooses a replicator based on the error a backend returned, or surfaces the (possibly
/// rewritten) error when no replication should be attempted.
///
pub type BlobReplicatorSelector =
    Box<dyn Fn(&Status) -> Result<Arc<dyn BlobReplicator>, Status> + Send + Sync + 'static>;

enum ReplicationRead {
    Single(Digest),
    Composite {
        parent_digest: Digest,
        child_digest: Digest,
        slicer: Arc<dyn BlobSlicer>,
    },
}

struct ReplicatingErrorHandler {
    read: ReplicationRead,
    selector: Option<BlobReplicatorSelector>,
}

#[async_trait]
impl ErrorHandler for ReplicatingErrorHandler {
    async fn on_error(&mut self, err: Status) -> Result<Buffer, Status> {
        // Single shot: if the replicated buffer fails as well, that error surfaces.
        let selector = match self.selector.take() {
            Some(selector) => selector,
            None => return Err(err),
        };
        let replicator = selector(&err)?;
        match &self.read {
            ReplicationRead::Single(digest) => Ok(replicator.replicate_single(digest).await),
            ReplicationRead::Composite {
                parent_digest,
                child_digest,
                slicer,
            } => Ok(replicator
                .replicate_composite(parent_digest, child_digest, slicer.clone())
                .await),
        }
    }
}

///
/// The shared "read, and on error consult a replicator and retry" idiom: installs an error
/// handler on the initial Buffer that asks `selector` for a replicator and resumes the read
/// from the replicated copy.
///
pub fn get_with_blob_replicator(
    initial: Buffer,
    digest: Digest,
    selector: BlobReplicatorSelector,
) -> Buffer {
    initial.with_error_handler(Box::new(ReplicatingErrorHandler {
        read: ReplicationRead::Single(digest),
        selector: Some(selector),
    }))
}

/// The composite flavor of `get_with_blob_replicator`.
pub fn get_composite_with_blob_replicator(
    initial: Buffer,
    parent_digest: Digest,
    child_digest: Digest,
    slicer: Arc<dyn BlobSlicer>,
    selector: BlobReplicatorSelector,
) -> Buffer {
    initial.with_error_handler(Box::new(ReplicatingErrorHandler {
        read: ReplicationRead::Composite {
            parent_digest,
            child_digest,
            slicer,
        },
        selector: Some(selector),
    }))
}

struct SinkInconsistencyHandler;

#[async_trait]
impl ErrorHandler for SinkInconsistencyHandler {
    async fn on_error(&mut self, err: Status) -> Result<Buffer, Status> {
        if err.code() == Code::NotFound {
            Err(Status::internal(format!(
                "Blob is absent from the sink immediately after replication: {}",
                err.message()
            )))
        } else {
            Err(err)
        }
    }
}

///
/// Reads a blob out of the sink right after a successful replication. At that point NotFound
/// can only mean the sink lost the blob again, which is an inconsistency rather than a cache
/// miss, so it must not be reported as NotFound to layers that would fall back on it.
///
pub(crate) async fn get_from_sink_after_replication(
    sink: &Arc<dyn BlobAccess>,
    digest: &Digest,
) -> Buffer {
    sink.get(digest)
        .await
        .with_error_handler(Box::new(SinkInconsistencyHandler))
}

pub(crate) async fn get_from_composite_from_sink_after_replication(
    sink: &Arc<dyn BlobAccess>,
    parent_digest: &Digest,
    child_digest: &Digest,
    slicer: Arc<dyn BlobSlicer>,
) -> Buffer {
    sink.get_from_composite(parent_digest, child_digest, slicer)
        .await
        .with_error_handler(Box::new(SinkInconsistencyHandler))
}
