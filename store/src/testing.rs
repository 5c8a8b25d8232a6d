// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use bytes::Bytes;
use hashing::{Digest, DigestSet, InstanceName};
use parking_lot::Mutex;
use protos::gen::build::bazel::remote::execution::v2::ServerCapabilities;
use tonic::Status;

use crate::replication::BlobReplicator;
use crate::{BlobAccess, BlobSlicer};

pub(crate) const MAX_SIZE: usize = 100 * 1024 * 1024;

pub(crate) async fn put_bytes(backend: &dyn BlobAccess, digest: &Digest, data: Bytes) {
    backend
        .put(digest, Buffer::from_validated_bytes(data))
        .await
        .expect("Put failed");
}

pub(crate) async fn get_bytes(backend: &dyn BlobAccess, digest: &Digest) -> Result<Bytes, Status> {
    backend.get(digest).await.to_byte_slice(MAX_SIZE).await
}

/// Counts calls into an inner backend, so tests can assert how decorators route requests.
pub(crate) struct CountingBlobAccess {
    inner: Arc<dyn BlobAccess>,
    pub get_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub find_missing_calls: AtomicUsize,
    pub find_missing_batch_sizes: Mutex<Vec<usize>>,
}

impl CountingBlobAccess {
    pub fn new(inner: Arc<dyn BlobAccess>) -> CountingBlobAccess {
        CountingBlobAccess {
            inner,
            get_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            find_missing_calls: AtomicUsize::new(0),
            find_missing_batch_sizes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BlobAccess for CountingBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(digest).await
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .get_from_composite(parent_digest, child_digest, slicer)
            .await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        self.find_missing_calls.fetch_add(1, Ordering::SeqCst);
        self.find_missing_batch_sizes.lock().push(digests.len());
        self.inner.find_missing(digests).await
    }

    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        self.inner.get_capabilities(instance_name).await
    }
}

/// Fails every operation with a clone of the given error.
pub(crate) struct ErroringBlobAccess {
    pub error: Status,
}

#[async_trait]
impl BlobAccess for ErroringBlobAccess {
    async fn get(&self, _digest: &Digest) -> Buffer {
        Buffer::from_error(self.error.clone())
    }

    async fn get_from_composite(
        &self,
        _parent_digest: &Digest,
        _child_digest: &Digest,
        _slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        Buffer::from_error(self.error.clone())
    }

    async fn put(&self, _digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        buffer.discard();
        Err(self.error.clone())
    }

    async fn find_missing(&self, _digests: DigestSet) -> Result<DigestSet, Status> {
        Err(self.error.clone())
    }

    async fn get_capabilities(
        &self,
        _instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        Err(self.error.clone())
    }
}

/// Counts calls into an inner replicator.
pub(crate) struct CountingBlobReplicator {
    base: Arc<dyn BlobReplicator>,
    pub replicate_single_calls: AtomicUsize,
    pub replicate_multiple_calls: AtomicUsize,
}

impl CountingBlobReplicator {
    pub fn new(base: Arc<dyn BlobReplicator>) -> CountingBlobReplicator {
        CountingBlobReplicator {
            base,
            replicate_single_calls: AtomicUsize::new(0),
            replicate_multiple_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BlobReplicator for CountingBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        self.replicate_single_calls.fetch_add(1, Ordering::SeqCst);
        self.base.replicate_single(digest).await
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        self.base
            .replicate_composite(parent_digest, child_digest, slicer)
            .await
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status> {
        self.replicate_multiple_calls.fetch_add(1, Ordering::SeqCst);
        self.base.replicate_multiple(digests).await
    }
}
