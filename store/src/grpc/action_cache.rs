// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use grpc_util::retry::{retry_call, status_is_retryable};
use hashing::{Digest, DigestSet, InstanceName};
use protos::digest_function_to_wire;
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use remexec::action_cache_client::ActionCacheClient;
use remexec::capabilities_client::CapabilitiesClient;
use remexec::{
    ActionResult, GetActionResultRequest, GetCapabilitiesRequest, ServerCapabilities,
    UpdateActionResultRequest,
};
use tonic::transport::Channel;
use tonic::Status;

use crate::{get_from_composite_via_get, BlobAccess, BlobSlicer};

///
/// An Action Cache backend that lives in another process, spoken to over the remote
/// execution protocol. Blobs are ActionResult messages; bulk existence checking is not part
/// of the Action Cache protocol surface.
///
pub struct ActionCacheGrpcBlobAccess {
    action_cache_client: ActionCacheClient<Channel>,
    capabilities_client: CapabilitiesClient<Channel>,
    maximum_message_size_bytes: usize,
}

impl ActionCacheGrpcBlobAccess {
    pub fn new(channel: Channel, maximum_message_size_bytes: usize) -> ActionCacheGrpcBlobAccess {
        ActionCacheGrpcBlobAccess {
            action_cache_client: ActionCacheClient::new(channel.clone()),
            capabilities_client: CapabilitiesClient::new(channel),
            maximum_message_size_bytes,
        }
    }
}

#[async_trait]
impl BlobAccess for ActionCacheGrpcBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let request = GetActionResultRequest {
            instance_name: digest.instance_name().as_str().to_owned(),
            action_digest: Some(digest.into()),
            inline_stdout: false,
            inline_stderr: false,
            inline_output_files: Vec::new(),
            digest_function: digest_function_to_wire(digest.digest_function()),
        };
        let result = retry_call(
            self.action_cache_client.clone(),
            |mut client, _| {
                let request = request.clone();
                async move { client.get_action_result(request).await }
            },
            status_is_retryable,
        )
        .await;
        match result {
            Ok(response) => Buffer::from_proto(&response.into_inner()),
            Err(status) => Buffer::from_error(status),
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
        let action_result: ActionResult =
            buffer.to_proto(self.maximum_message_size_bytes).await?;
        let request = UpdateActionResultRequest {
            instance_name: digest.instance_name().as_str().to_owned(),
            action_digest: Some(digest.into()),
            action_result: Some(action_result),
            digest_function: digest_function_to_wire(digest.digest_function()),
        };
        retry_call(
            self.action_cache_client.clone(),
            |mut client, _| {
                let request = request.clone();
                async move { client.update_action_result(request).await }
            },
            status_is_retryable,
        )
        .await?;
        Ok(())
    }

    async fn find_missing(&self, _digests: DigestSet) -> Result<DigestSet, Status> {
        Err(Status::unimplemented(
            "The Action Cache protocol does not support bulk existence checking",
        ))
    }

    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        let request = GetCapabilitiesRequest {
            instance_name: instance_name.as_str().to_owned(),
        };
        let response = retry_call(
            self.capabilities_client.clone(),
            |mut client, _| {
                let request = request.clone();
                async move { client.get_capabilities(request).await }
            },
            status_is_retryable,
        )
        .await?;
        Ok(response.into_inner())
    }
}
