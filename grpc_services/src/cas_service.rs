// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::pin::Pin;
use std::sync::Arc;

use buffer::{Buffer, BufferSource};
use bytes::Bytes;
use futures::{future, Stream};
use hashing::{Digest, DigestSetBuilder, Function, InstanceName};
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use protos::{require_digest, require_digest_function};
use remexec::content_addressable_storage_server::ContentAddressableStorage;
use store::BlobAccess;
use tonic::{Request, Response, Status};

/// Serves the unary Content Addressable Storage surface on top of a BlobAccess.
pub struct CasService {
    content_addressable_storage: Arc<dyn BlobAccess>,
    maximum_message_size_bytes: usize,
}

impl CasService {
    pub fn new(
        content_addressable_storage: Arc<dyn BlobAccess>,
        maximum_message_size_bytes: usize,
    ) -> CasService {
        CasService {
            content_addressable_storage,
            maximum_message_size_bytes,
        }
    }

    fn request_function(&self, instance_name: &str, digest_function: i32) -> Result<Function, Status> {
        Ok(Function::new(
            InstanceName::new(instance_name)?,
            require_digest_function(digest_function)?,
        ))
    }

    fn rpc_status(code: protos::gen::google::rpc::Code, message: impl Into<String>) -> protos::gen::google::rpc::Status {
        protos::gen::google::rpc::Status {
            code: code as i32,
            message: message.into(),
        }
    }

    fn status_to_rpc_status(status: &Status) -> protos::gen::google::rpc::Status {
        protos::gen::google::rpc::Status {
            code: status.code() as i32,
            message: status.message().to_owned(),
        }
    }

    async fn write_blob(
        &self,
        function: &Function,
        request: remexec::batch_update_blobs_request::Request,
    ) -> remexec::batch_update_blobs_response::Response {
        let wire_digest = request.digest.clone();
        let digest = match require_digest(function, request.digest.as_ref()) {
            Ok(digest) => digest,
            Err(err) => {
                return remexec::batch_update_blobs_response::Response {
                    digest: wire_digest,
                    status: Some(Self::status_to_rpc_status(&err)),
                }
            }
        };
        if request.compressor != remexec::compressor::Value::Identity as i32 {
            return remexec::batch_update_blobs_response::Response {
                digest: wire_digest,
                status: Some(Self::rpc_status(
                    protos::gen::google::rpc::Code::InvalidArgument,
                    "Only the identity compressor is supported",
                )),
            };
        }
        let buffer = Buffer::from_cas_bytes(&digest, request.data, BufferSource::UserProvided);
        let status = match self.content_addressable_storage.put(&digest, buffer).await {
            Ok(()) => Self::rpc_status(protos::gen::google::rpc::Code::Ok, ""),
            Err(err) => Self::status_to_rpc_status(&err),
        };
        remexec::batch_update_blobs_response::Response {
            digest: wire_digest,
            status: Some(status),
        }
    }

    async fn read_blob(
        &self,
        digest: &Digest,
        wire_digest: remexec::Digest,
    ) -> remexec::batch_read_blobs_response::Response {
        let buffer = self.content_addressable_storage.get(digest).await;
        match buffer.to_byte_slice(self.maximum_message_size_bytes).await {
            Ok(data) => remexec::batch_read_blobs_response::Response {
                digest: Some(wire_digest),
                data,
                status: Some(Self::rpc_status(protos::gen::google::rpc::Code::Ok, "")),
                compressor: remexec::compressor::Value::Identity as i32,
            },
            Err(err) => remexec::batch_read_blobs_response::Response {
                digest: Some(wire_digest),
                data: Bytes::new(),
                status: Some(Self::status_to_rpc_status(&err)),
                compressor: remexec::compressor::Value::Identity as i32,
            },
        }
    }
}

#[tonic::async_trait]
impl ContentAddressableStorage for CasService {
    async fn find_missing_blobs(
        &self,
        request: Request<remexec::FindMissingBlobsRequest>,
    ) -> Result<Response<remexec::FindMissingBlobsResponse>, Status> {
        let request = request.into_inner();
        let function = self.request_function(&request.instance_name, request.digest_function)?;
        let mut builder = DigestSetBuilder::new();
        for wire_digest in &request.blob_digests {
            builder.add(require_digest(&function, wire_digest)?);
        }
        // The empty blob is always present; do not bother the backends with it.
        let digests = builder.build().remove_empty_blob();
        let missing = self.content_addressable_storage.find_missing(digests).await?;
        Ok(Response::new(remexec::FindMissingBlobsResponse {
            missing_blob_digests: missing.items().iter().map(|d| d.into()).collect(),
        }))
    }

    async fn batch_update_blobs(
        &self,
        request: Request<remexec::BatchUpdateBlobsRequest>,
    ) -> Result<Response<remexec::BatchUpdateBlobsResponse>, Status> {
        let request = request.into_inner();
        let function = self.request_function(&request.instance_name, request.digest_function)?;
        let combined_size: u64 = request
            .requests
            .iter()
            .map(|r| r.data.len() as u64)
            .sum();
        if combined_size > self.maximum_message_size_bytes as u64 {
            return Err(Status::invalid_argument(format!(
                "Combined size of the updates is {combined_size} bytes, which exceeds the \
                 maximum message size of {} bytes",
                self.maximum_message_size_bytes
            )));
        }
        let writes: Vec<_> = request
            .requests
            .into_iter()
            .map(|entry| self.write_blob(&function, entry))
            .collect();
        let responses = future::join_all(writes).await;
        Ok(Response::new(remexec::BatchUpdateBlobsResponse {
            responses,
        }))
    }

    async fn batch_read_blobs(
        &self,
        request: Request<remexec::BatchReadBlobsRequest>,
    ) -> Result<Response<remexec::BatchReadBlobsResponse>, Status> {
        let request = request.into_inner();
        let function = self.request_function(&request.instance_name, request.digest_function)?;
        let mut reads = Vec::with_capacity(request.digests.len());
        let mut combined_size: u64 = 0;
        for wire_digest in request.digests {
            let digest = require_digest(&function, &wire_digest)?;
            combined_size += digest.size_bytes();
            reads.push((digest, wire_digest));
        }
        if combined_size > self.maximum_message_size_bytes as u64 {
            return Err(Status::invalid_argument(format!(
                "Combined size of the requested blobs is {combined_size} bytes, which exceeds \
                 the maximum message size of {} bytes",
                self.maximum_message_size_bytes
            )));
        }
        let reads: Vec<_> = reads
            .iter()
            .map(|(digest, wire_digest)| self.read_blob(digest, wire_digest.clone()))
            .collect();
        let responses = future::join_all(reads).await;
        Ok(Response::new(remexec::BatchReadBlobsResponse {
            responses,
        }))
    }

    type GetTreeStream =
        Pin<Box<dyn Stream<Item = Result<remexec::GetTreeResponse, Status>> + Send + 'static>>;

    async fn get_tree(
        &self,
        _request: Request<remexec::GetTreeRequest>,
    ) -> Result<Response<Self::GetTreeStream>, Status> {
        Err(Status::unimplemented(
            "Clients are expected to fetch Tree objects out of the Content Addressable Storage",
        ))
    }
}
