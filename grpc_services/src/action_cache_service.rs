// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use buffer::Buffer;
use hashing::{Function, InstanceName};
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use protos::{require_digest, require_digest_function};
use remexec::action_cache_server::ActionCache;
use store::BlobAccess;
use tonic::{Request, Response, Status};

/// Serves action results on top of a BlobAccess, typically one wrapped in completeness
/// checking so that only results whose outputs still exist are handed out.
pub struct ActionCacheService {
    action_cache: Arc<dyn BlobAccess>,
    maximum_message_size_bytes: usize,
}

impl ActionCacheService {
    pub fn new(
        action_cache: Arc<dyn BlobAccess>,
        maximum_message_size_bytes: usize,
    ) -> ActionCacheService {
        ActionCacheService {
            action_cache,
            maximum_message_size_bytes,
        }
    }

    fn request_function(&self, instance_name: &str, digest_function: i32) -> Result<Function, Status> {
        Ok(Function::new(
            InstanceName::new(instance_name)?,
            require_digest_function(digest_function)?,
        ))
    }
}

#[tonic::async_trait]
impl ActionCache for ActionCacheService {
    async fn get_action_result(
        &self,
        request: Request<remexec::GetActionResultRequest>,
    ) -> Result<Response<remexec::ActionResult>, Status> {
        let request = request.into_inner();
        let function = self.request_function(&request.instance_name, request.digest_function)?;
        let digest = require_digest(&function, request.action_digest.as_ref())?;
        let action_result = self
            .action_cache
            .get(&digest)
            .await
            .to_proto(self.maximum_message_size_bytes)
            .await?;
        Ok(Response::new(action_result))
    }

    async fn update_action_result(
        &self,
        request: Request<remexec::UpdateActionResultRequest>,
    ) -> Result<Response<remexec::ActionResult>, Status> {
        let request = request.into_inner();
        let function = self.request_function(&request.instance_name, request.digest_function)?;
        let digest = require_digest(&function, request.action_digest.as_ref())?;
        let action_result = request
            .action_result
            .ok_or_else(|| Status::invalid_argument("Missing action result"))?;
        self.action_cache
            .put(&digest, Buffer::from_proto(&action_result))
            .await?;
        Ok(Response::new(action_result))
    }
}
