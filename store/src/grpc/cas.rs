// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use buffer::{Buffer, BufferSource, ChunkReader};
use bytes::Bytes;
use grpc_util::retry::{retry_call, status_is_retryable};
use hashing::{Compressor, Digest, DigestFunction, DigestSet, DigestSetBuilder, Function, InstanceName};
use parking_lot::Mutex;
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use protos::gen::google::bytestream::byte_stream_client::ByteStreamClient;
use protos::gen::google::bytestream::{ReadRequest, ReadResponse, WriteRequest};
use protos::{digest_function_to_wire, require_digest};
use remexec::capabilities_client::CapabilitiesClient;
use remexec::content_addressable_storage_client::ContentAddressableStorageClient;
use remexec::{BatchUpdateBlobsRequest, GetCapabilitiesRequest, ServerCapabilities};
use tonic::transport::Channel;
use tonic::{Code, Request, Status};
use uuid::Uuid;

use crate::{get_from_composite_via_get, BlobAccess, BlobSlicer};

/// The chunk size of byte stream writes.
const WRITE_CHUNK_SIZE_BYTES: usize = 64 * 1024;

struct GrpcReadChunkReader {
    stream: tonic::Streaming<ReadResponse>,
}

#[async_trait]
impl ChunkReader for GrpcReadChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        Ok(self.stream.message().await?.map(|response| response.data))
    }
}

///
/// A Content Addressable Storage backend that lives in another process, spoken to over the
/// remote execution protocol: reads and writes go over the byte stream interface (batched
/// when small enough), existence checks over FindMissingBlobs.
///
pub struct CasGrpcBlobAccess {
    byte_stream_client: ByteStreamClient<Channel>,
    cas_client: ContentAddressableStorageClient<Channel>,
    capabilities_client: CapabilitiesClient<Channel>,
    batch_api_size_limit: usize,
}

impl CasGrpcBlobAccess {
    pub fn new(channel: Channel, batch_api_size_limit: usize) -> CasGrpcBlobAccess {
        CasGrpcBlobAccess {
            byte_stream_client: ByteStreamClient::new(channel.clone()),
            cas_client: ContentAddressableStorageClient::new(channel.clone()),
            capabilities_client: CapabilitiesClient::new(channel),
            batch_api_size_limit,
        }
    }

    fn put_batch<'a>(
        &'a self,
        digest: &'a Digest,
        buffer: Buffer,
    ) -> Pin<Box<dyn Future<Output = Result<(), Status>> + Send + 'a>> {
        Box::pin(async move {
            let data = buffer.to_byte_slice(self.batch_api_size_limit).await?;
            let request = BatchUpdateBlobsRequest {
                instance_name: digest.instance_name().as_str().to_owned(),
                requests: vec![remexec::batch_update_blobs_request::Request {
                    digest: Some(digest.into()),
                    data,
                    compressor: remexec::compressor::Value::Identity as i32,
                }],
                digest_function: digest_function_to_wire(digest.digest_function()),
            };
            let response = retry_call(
                self.cas_client.clone(),
                |mut client, _| {
                    let request = request.clone();
                    async move { client.batch_update_blobs(request).await }
                },
                status_is_retryable,
            )
            .await?;
            for entry in response.into_inner().responses {
                if let Some(status) = entry.status {
                    if status.code != 0 {
                        return Err(Status::new(Code::from(status.code), status.message));
                    }
                }
            }
            Ok(())
        })
    }

    fn put_streaming<'a>(
        &'a self,
        digest: &'a Digest,
        buffer: Buffer,
    ) -> Pin<Box<dyn Future<Output = Result<(), Status>> + Send + 'a>> {
        let fut: Pin<Box<dyn Future<Output = Result<(), Status>> + Send + 'a>> = Box::pin(async move {
            let resource_name = digest.get_byte_stream_write_path(Uuid::new_v4(), Compressor::Identity);
            let declared_size = digest.size_bytes();
            let mut chunk_reader = buffer.to_chunk_reader(0, WRITE_CHUNK_SIZE_BYTES);

            // An error reading the buffer has to be carried out of band: the request stream can
            // only end, and the server-side error that follows would mask the root cause.
            let read_error = Arc::new(Mutex::new(None));
            let read_error_stream = read_error.clone();

            let requests = async_stream::stream! {
                if declared_size == 0 {
                    // An empty blob still needs a single write request.
                    yield WriteRequest {
                        resource_name: resource_name.clone(),
                        write_offset: 0,
                        finish_write: true,
                        data: Bytes::new(),
                    };
                    return;
                }
                let mut offset: i64 = 0;
                loop {
                    match chunk_reader.read().await {
                        Ok(Some(data)) => {
                            let write_offset = offset;
                            offset += data.len() as i64;
                            let finish_write = offset as u64 >= declared_size;
                            yield WriteRequest {
                                resource_name: resource_name.clone(),
                                write_offset,
                                finish_write,
                                data,
                            };
                            if finish_write {
                                // One more read drives the integrity check that concludes at
                                // end of stream.
                                if let Err(err) = chunk_reader.read().await {
                                    *read_error_stream.lock() = Some(err);
                                }
                                break;
                            }
                        }
                        Ok(None) => {
                            *read_error_stream.lock() = Some(Status::internal(format!(
                                "Buffer ended after {offset} bytes, while {declared_size} bytes were \
                                 declared"
                            )));
                            break;
                        }
                        Err(err) => {
                            *read_error_stream.lock() = Some(err);
                            break;
                        }
                    }
                }
            };

            let mut client = self.byte_stream_client.clone();
            let result = client.write(Request::new(requests)).await;
            if let Some(err) = read_error.lock().take() {
                return Err(err);
            }
            let response = result?.into_inner();
            if response.committed_size != declared_size as i64 {
                return Err(Status::internal(format!(
                    "Attempted to write {declared_size} bytes, while the server committed {} bytes",
                    response.committed_size
                )));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl BlobAccess for CasGrpcBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        // Every Content Addressable Storage holds the empty blob.
        if digest.is_empty_blob() {
            return Buffer::from_validated_bytes(Bytes::new());
        }
        let request = ReadRequest {
            resource_name: digest.get_byte_stream_read_path(Compressor::Identity),
            read_offset: 0,
            // 0 means no limit.
            read_limit: 0,
        };
        let mut client = self.byte_stream_client.clone();
        match client.read(request).await {
            Ok(response) => Buffer::from_cas_chunk_reader(
                digest,
                Box::new(GrpcReadChunkReader {
                    stream: response.into_inner(),
                }),
                BufferSource::irreparable(),
            ),
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
        if digest.is_empty_blob() {
            buffer.discard();
            return Ok(());
        }
        if digest.size_bytes() <= self.batch_api_size_limit as u64 {
            self.put_batch(digest, buffer).await
        } else {
            self.put_streaming(digest, buffer).await
        }
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        // One request per (instance name, digest function) pair, which is all a single
        // request can express.
        let mut groups: HashMap<(InstanceName, DigestFunction), Vec<Digest>> = HashMap::new();
        for digest in &digests {
            groups
                .entry((digest.instance_name().clone(), digest.digest_function()))
                .or_default()
                .push(digest.clone());
        }
        let mut builder = DigestSetBuilder::new();
        for ((instance_name, digest_function), digests) in groups {
            let request = remexec::FindMissingBlobsRequest {
                instance_name: instance_name.as_str().to_owned(),
                blob_digests: digests.iter().map(|d| d.into()).collect(),
                digest_function: digest_function_to_wire(digest_function),
            };
            let response = retry_call(
                self.cas_client.clone(),
                |mut client, _| {
                    let request = request.clone();
                    async move { client.find_missing_blobs(request).await }
                },
                status_is_retryable,
            )
            .await?;
            let function = Function::new(instance_name, digest_function);
            for wire_digest in response.into_inner().missing_blob_digests {
                let digest = require_digest(&function, Some(&wire_digest)).map_err(|err| {
                    Status::internal(format!(
                        "Server reported a malformed missing digest: {}",
                        err.message()
                    ))
                })?;
                builder.add(digest);
            }
        }
        // Guard the contract: the result is a subset of the input, whatever the server said.
        let (_, missing) = digests.difference_and_intersection(&builder.build());
        Ok(missing)
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
