// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use bytes::Bytes;
use hashing::{Digest, DigestSet, DigestSetBuilder, InstanceName, KeyFormat};
use parking_lot::Mutex;
use protos::gen::build::bazel::remote::execution::v2::ServerCapabilities;
use tonic::Status;

use crate::{
    get_from_composite_via_get, local_capabilities, BlobAccess, BlobAccessKind, BlobSlicer,
};

///
/// A leaf backend that stores blobs in a map in memory. Small deployments use it as a
/// volatile cache tier; tests use it as the ground truth backend.
///
/// The key format decides whether blobs are shared across instance names.
///
pub struct MemoryBlobAccess {
    kind: BlobAccessKind,
    key_format: KeyFormat,
    maximum_blob_size_bytes: usize,
    blobs: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobAccess {
    pub fn new(kind: BlobAccessKind, key_format: KeyFormat) -> MemoryBlobAccess {
        MemoryBlobAccess {
            kind,
            key_format,
            maximum_blob_size_bytes: usize::MAX,
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_maximum_blob_size_bytes(mut self, maximum_blob_size_bytes: usize) -> Self {
        self.maximum_blob_size_bytes = maximum_blob_size_bytes;
        self
    }

    pub fn key_format(&self) -> KeyFormat {
        self.key_format
    }

    /// The number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }
}

#[async_trait]
impl BlobAccess for MemoryBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let data = self.blobs.lock().get(&digest.get_key(self.key_format)).cloned();
        match data {
            // Contents were validated on the way in.
            Some(data) => Buffer::from_validated_bytes(data),
            None => Buffer::from_error(Status::not_found(format!(
                "Blob {digest} does not exist"
            ))),
        }
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        get_from_composite_via_get(self, parent_digest, child_digest, slicer).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        let data = buffer.to_byte_slice(self.maximum_blob_size_bytes).await?;
        self.blobs
            .lock()
            .insert(digest.get_key(self.key_format), data);
        Ok(())
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        if self.kind == BlobAccessKind::ActionCache {
            return Err(Status::unimplemented(
                "The Action Cache does not support bulk existence checking",
            ));
        }
        let blobs = self.blobs.lock();
        let mut builder = DigestSetBuilder::new();
        for digest in &digests {
            if !blobs.contains_key(&digest.get_key(self.key_format)) {
                builder.add(digest.clone());
            }
        }
        Ok(builder.build())
    }

    async fn get_capabilities(
        &self,
        _instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        Ok(local_capabilities(self.kind))
    }
}
