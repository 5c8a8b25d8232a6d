// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use grpc_util::prost::MessageExt;
use hashing::{Digest, DigestSet, DigestSetBuilder, Function, InstanceName};
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use protos::require_digest;
use remexec::ServerCapabilities;
use tonic::{Code, Status};

use crate::{BlobAccess, BlobSlicer};

///
/// Wraps an Action Cache and only serves action results whose referenced Content Addressable
/// Storage objects all still exist: output files, stdout, stderr, and the full contents of
/// every output directory's Tree. An action result with anything missing is reported as
/// NotFound, so that clients rerun the action instead of failing on the first absent output.
///
/// Existence checks are batched; `batch_size` bounds the number of digests per FindMissing
/// call, and `maximum_total_tree_size_bytes` bounds the combined size of Tree messages that
/// will be fetched and parsed for a single action result.
///
pub struct CompletenessCheckingBlobAccess {
    action_cache: Arc<dyn BlobAccess>,
    content_addressable_storage: Arc<dyn BlobAccess>,
    batch_size: usize,
    maximum_message_size_bytes: usize,
    maximum_total_tree_size_bytes: u64,
}

/// Accumulates digests and flushes a FindMissing call whenever `batch_size` of them are
/// pending. Any missing digest fails the whole check.
struct FindMissingBatcher<'a> {
    content_addressable_storage: &'a dyn BlobAccess,
    batch_size: usize,
    pending: DigestSetBuilder,
    pending_count: usize,
}

impl<'a> FindMissingBatcher<'a> {
    fn new(
        content_addressable_storage: &'a dyn BlobAccess,
        batch_size: usize,
    ) -> FindMissingBatcher<'a> {
        FindMissingBatcher {
            content_addressable_storage,
            batch_size,
            pending: DigestSetBuilder::new(),
            pending_count: 0,
        }
    }

    async fn add(&mut self, digest: Digest) -> Result<(), Status> {
        self.pending.add(digest);
        self.pending_count += 1;
        if self.pending_count >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), Status> {
        let batch = std::mem::take(&mut self.pending).build();
        self.pending_count = 0;
        if batch.is_empty() {
            return Ok(());
        }
        let missing = self.content_addressable_storage.find_missing(batch).await?;
        match missing.first() {
            None => Ok(()),
            Some(digest) => Err(Status::not_found(format!(
                "Object {digest} referenced by the action result is not present in the \
                 Content Addressable Storage"
            ))),
        }
    }
}

impl CompletenessCheckingBlobAccess {
    pub fn new(
        action_cache: Arc<dyn BlobAccess>,
        content_addressable_storage: Arc<dyn BlobAccess>,
        batch_size: usize,
        maximum_message_size_bytes: usize,
        maximum_total_tree_size_bytes: u64,
    ) -> CompletenessCheckingBlobAccess {
        CompletenessCheckingBlobAccess {
            action_cache,
            content_addressable_storage,
            batch_size,
            maximum_message_size_bytes,
            maximum_total_tree_size_bytes,
        }
    }

    ///
    /// A digest inside an action result that does not parse means the result can never be
    /// served completely. It is reported as NotFound rather than InvalidArgument: the request
    /// itself was fine, and the client's remedy is to rebuild.
    ///
    fn parse_result_digest(
        function: &Function,
        digest: Option<&remexec::Digest>,
        what: &str,
    ) -> Result<Digest, Status> {
        require_digest(function, digest).map_err(|err| {
            Status::not_found(format!(
                "Action result contains a malformed {what} digest: {}",
                err.message()
            ))
        })
    }

    async fn check_completeness(
        &self,
        function: &Function,
        action_result: &remexec::ActionResult,
    ) -> Result<(), Status> {
        let mut batcher =
            FindMissingBatcher::new(self.content_addressable_storage.as_ref(), self.batch_size);
        let mut remaining_tree_budget = self.maximum_total_tree_size_bytes;

        for file in &action_result.output_files {
            let digest = Self::parse_result_digest(function, file.digest.as_ref(), "output file")?;
            batcher.add(digest).await?;
        }
        if let Some(digest) = &action_result.stdout_digest {
            batcher
                .add(Self::parse_result_digest(function, Some(digest), "stdout")?)
                .await?;
        }
        if let Some(digest) = &action_result.stderr_digest {
            batcher
                .add(Self::parse_result_digest(function, Some(digest), "stderr")?)
                .await?;
        }
        for directory in &action_result.output_directories {
            let tree_digest = Self::parse_result_digest(
                function,
                directory.tree_digest.as_ref(),
                "output directory tree",
            )?;
            if tree_digest.size_bytes() > remaining_tree_budget {
                return Err(Status::not_found(format!(
                    "Combined size of the output directory trees exceeds the maximum of {} \
                     bytes that will be checked for completeness",
                    self.maximum_total_tree_size_bytes
                )));
            }
            remaining_tree_budget -= tree_digest.size_bytes();
            batcher.add(tree_digest.clone()).await?;

            let tree: remexec::Tree = self
                .content_addressable_storage
                .get(&tree_digest)
                .await
                .to_proto(self.maximum_message_size_bytes)
                .await
                .map_err(|err| match err.code() {
                    // A missing or unparseable tree means the result cannot be served.
                    Code::NotFound | Code::InvalidArgument => Status::not_found(format!(
                        "Failed to fetch output directory tree {tree_digest}: {}",
                        err.message()
                    )),
                    _ => err,
                })?;
            let check_directories = directory.root_directory_digest.is_some();
            if check_directories {
                batcher
                    .add(Self::parse_result_digest(
                        function,
                        directory.root_directory_digest.as_ref(),
                        "root directory",
                    )?)
                    .await?;
            }
            for child in tree.root.iter().chain(tree.children.iter()) {
                for file in &child.files {
                    let digest =
                        Self::parse_result_digest(function, file.digest.as_ref(), "tree file")?;
                    batcher.add(digest).await?;
                }
                if check_directories {
                    // With a root directory digest set, the individual Directory messages
                    // are expected to be present in the CAS as well.
                    batcher.add(child.to_digest(function)).await?;
                }
            }
        }
        batcher.flush().await
    }
}

#[async_trait]
impl BlobAccess for CompletenessCheckingBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let buffer = self.action_cache.get(digest).await;
        let (for_decoding, for_caller) = buffer
            .clone_copy(self.maximum_message_size_bytes)
            .await;
        let action_result: remexec::ActionResult =
            match for_decoding.to_proto(self.maximum_message_size_bytes).await {
                Ok(action_result) => action_result,
                Err(err) => {
                    for_caller.discard();
                    return Buffer::from_error(err);
                }
            };
        match self
            .check_completeness(&digest.function(), &action_result)
            .await
        {
            Ok(()) => for_caller,
            Err(err) => {
                for_caller.discard();
                Buffer::from_error(err)
            }
        }
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        // Action results are not composite objects; slice the checked result.
        let buffer = self.get(parent_digest).await;
        slicer.slice(buffer, child_digest).await
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        self.action_cache.put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        self.action_cache.find_missing(digests).await
    }

    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        self.action_cache.get_capabilities(instance_name).await
    }
}
