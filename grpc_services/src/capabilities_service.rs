// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use hashing::InstanceName;
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use remexec::capabilities_server::Capabilities;
use store::BlobAccess;
use tonic::{Request, Response, Status};

///
/// Reports the capabilities of a deployment: the cache capabilities of the Content
/// Addressable Storage, overlaid with the Action Cache's update capability when an Action
/// Cache is served at all. Digest functions are advertised only when both sides accept them.
///
pub struct CapabilitiesService {
    content_addressable_storage: Arc<dyn BlobAccess>,
    action_cache: Option<Arc<dyn BlobAccess>>,
}

impl CapabilitiesService {
    pub fn new(
        content_addressable_storage: Arc<dyn BlobAccess>,
        action_cache: Option<Arc<dyn BlobAccess>>,
    ) -> CapabilitiesService {
        CapabilitiesService {
            content_addressable_storage,
            action_cache,
        }
    }
}

#[tonic::async_trait]
impl Capabilities for CapabilitiesService {
    async fn get_capabilities(
        &self,
        request: Request<remexec::GetCapabilitiesRequest>,
    ) -> Result<Response<remexec::ServerCapabilities>, Status> {
        let request = request.into_inner();
        let instance_name = InstanceName::new(request.instance_name)?;
        let mut capabilities = self
            .content_addressable_storage
            .get_capabilities(&instance_name)
            .await?;
        if let Some(action_cache) = &self.action_cache {
            let action_cache_capabilities = action_cache.get_capabilities(&instance_name).await?;
            if let (Some(cache_capabilities), Some(ac_cache_capabilities)) = (
                capabilities.cache_capabilities.as_mut(),
                action_cache_capabilities.cache_capabilities,
            ) {
                cache_capabilities.action_cache_update_capabilities =
                    ac_cache_capabilities.action_cache_update_capabilities;
                cache_capabilities
                    .digest_functions
                    .retain(|f| ac_cache_capabilities.digest_functions.contains(f));
            }
        } else if let Some(cache_capabilities) = capabilities.cache_capabilities.as_mut() {
            cache_capabilities.action_cache_update_capabilities = None;
        }
        Ok(Response::new(capabilities))
    }
}
