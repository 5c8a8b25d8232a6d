// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use hashing::{Digest, Function, InstanceName};
use parking_lot::Mutex;
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use protos::gen::google::bytestream::byte_stream_server::{ByteStream, ByteStreamServer};
use protos::gen::google::bytestream::{
    QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
use protos::require_digest_function;
use remexec::action_cache_server::{ActionCache, ActionCacheServer};
use remexec::capabilities_server::{Capabilities, CapabilitiesServer};
use remexec::content_addressable_storage_server::{
    ContentAddressableStorage, ContentAddressableStorageServer,
};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use crate::data::{TestData, TestDirectory, TestTree};

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequestType {
    // ByteStream
    BsRead,
    BsWrite,
    // ContentAddressableStorage
    CasFindMissingBlobs,
    CasBatchUpdateBlobs,
    CasBatchReadBlobs,
    // ActionCache
    AcGetActionResult,
    AcUpdateActionResult,
}

pub type RequestCounter = Mutex<HashMap<RequestType, usize>>;

impl RequestType {
    fn record(self, request_counts: &RequestCounter) {
        *request_counts.lock().entry(self).or_insert(0) += 1;
    }
}

#[derive(Clone)]
struct StubCasResponder {
    chunk_size_bytes: usize,
    always_errors: bool,
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
    action_results: Arc<Mutex<HashMap<String, remexec::ActionResult>>>,
    request_counts: Arc<RequestCounter>,
}

impl StubCasResponder {
    fn check_always_errors(&self) -> Result<(), Status> {
        if self.always_errors {
            Err(Status::unavailable("StubCas is configured to always fail"))
        } else {
            Ok(())
        }
    }

    fn instance_function(&self, instance_name: &str, digest_function: i32) -> Result<Function, Status> {
        let instance_name = InstanceName::new(instance_name)?;
        Ok(Function::new(
            instance_name,
            require_digest_function(digest_function)?,
        ))
    }
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl ByteStream for StubCasResponder {
    type ReadStream = ResponseStream<ReadResponse>;

    async fn read(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<Self::ReadStream>, Status> {
        RequestType::BsRead.record(&self.request_counts);
        self.check_always_errors()?;
        let request = request.into_inner();
        let (digest, _) = Digest::parse_byte_stream_read_path(&request.resource_name)?;
        let data = self
            .blobs
            .lock()
            .get(&digest.hash().to_hex())
            .cloned()
            .ok_or_else(|| Status::not_found(format!("Blob {digest} does not exist")))?;
        let mut responses = Vec::new();
        if data.is_empty() {
            responses.push(Ok(ReadResponse { data }));
        } else {
            let mut offset = usize::try_from(request.read_offset).unwrap_or(0);
            while offset < data.len() {
                let end = (offset + self.chunk_size_bytes).min(data.len());
                responses.push(Ok(ReadResponse {
                    data: data.slice(offset..end),
                }));
                offset = end;
            }
        }
        Ok(Response::new(Box::pin(futures::stream::iter(responses))))
    }

    async fn write(
        &self,
        request: Request<Streaming<WriteRequest>>,
    ) -> Result<Response<WriteResponse>, Status> {
        RequestType::BsWrite.record(&self.request_counts);
        self.check_always_errors()?;
        let mut stream = request.into_inner();
        let mut digest: Option<Digest> = None;
        let mut received = BytesMut::new();
        while let Some(message) = stream.message().await? {
            if digest.is_none() {
                let (parsed, _) = Digest::parse_byte_stream_write_path(&message.resource_name)?;
                digest = Some(parsed);
            }
            received.extend_from_slice(&message.data);
            if message.finish_write {
                break;
            }
        }
        let digest =
            digest.ok_or_else(|| Status::invalid_argument("Write contained no messages"))?;
        let received = received.freeze();
        if received.len() as u64 != digest.size_bytes() {
            return Err(Status::invalid_argument(format!(
                "Received {} bytes, while {} bytes were declared",
                received.len(),
                digest.size_bytes()
            )));
        }
        let mut generator = digest.function().new_generator();
        generator.update(&received);
        if generator.finish().hash() != digest.hash() {
            return Err(Status::invalid_argument("Received data has the wrong hash"));
        }
        self.blobs
            .lock()
            .insert(digest.hash().to_hex(), received.clone());
        Ok(Response::new(WriteResponse {
            committed_size: received.len() as i64,
        }))
    }

    async fn query_write_status(
        &self,
        _request: Request<QueryWriteStatusRequest>,
    ) -> Result<Response<QueryWriteStatusResponse>, Status> {
        Err(Status::unimplemented("Clients restart uploads from scratch"))
    }
}

#[tonic::async_trait]
impl ContentAddressableStorage for StubCasResponder {
    async fn find_missing_blobs(
        &self,
        request: Request<remexec::FindMissingBlobsRequest>,
    ) -> Result<Response<remexec::FindMissingBlobsResponse>, Status> {
        RequestType::CasFindMissingBlobs.record(&self.request_counts);
        self.check_always_errors()?;
        let request = request.into_inner();
        let blobs = self.blobs.lock();
        let missing_blob_digests = request
            .blob_digests
            .into_iter()
            .filter(|d| !blobs.contains_key(&d.hash))
            .collect();
        Ok(Response::new(remexec::FindMissingBlobsResponse {
            missing_blob_digests,
        }))
    }

    async fn batch_update_blobs(
        &self,
        request: Request<remexec::BatchUpdateBlobsRequest>,
    ) -> Result<Response<remexec::BatchUpdateBlobsResponse>, Status> {
        RequestType::CasBatchUpdateBlobs.record(&self.request_counts);
        self.check_always_errors()?;
        let request = request.into_inner();
        let function = self.instance_function(&request.instance_name, request.digest_function)?;
        let mut responses = Vec::new();
        for entry in request.requests {
            let digest = match protos::require_digest(&function, entry.digest.as_ref()) {
                Ok(digest) => digest,
                Err(err) => {
                    responses.push(remexec::batch_update_blobs_response::Response {
                        digest: entry.digest,
                        status: Some(protos::gen::google::rpc::Status {
                            code: protos::gen::google::rpc::Code::InvalidArgument as i32,
                            message: err.message().to_owned(),
                        }),
                    });
                    continue;
                }
            };
            self.blobs.lock().insert(digest.hash().to_hex(), entry.data);
            responses.push(remexec::batch_update_blobs_response::Response {
                digest: entry.digest,
                status: Some(protos::gen::google::rpc::Status {
                    code: protos::gen::google::rpc::Code::Ok as i32,
                    message: String::new(),
                }),
            });
        }
        Ok(Response::new(remexec::BatchUpdateBlobsResponse {
            responses,
        }))
    }

    async fn batch_read_blobs(
        &self,
        request: Request<remexec::BatchReadBlobsRequest>,
    ) -> Result<Response<remexec::BatchReadBlobsResponse>, Status> {
        RequestType::CasBatchReadBlobs.record(&self.request_counts);
        self.check_always_errors()?;
        let request = request.into_inner();
        let blobs = self.blobs.lock();
        let responses = request
            .digests
            .into_iter()
            .map(|d| match blobs.get(&d.hash) {
                Some(data) => remexec::batch_read_blobs_response::Response {
                    digest: Some(d),
                    data: data.clone(),
                    status: Some(protos::gen::google::rpc::Status {
                        code: protos::gen::google::rpc::Code::Ok as i32,
                        message: String::new(),
                    }),
                    compressor: remexec::compressor::Value::Identity as i32,
                },
                None => remexec::batch_read_blobs_response::Response {
                    digest: Some(d),
                    data: Bytes::new(),
                    status: Some(protos::gen::google::rpc::Status {
                        code: protos::gen::google::rpc::Code::NotFound as i32,
                        message: "Blob does not exist".to_owned(),
                    }),
                    compressor: remexec::compressor::Value::Identity as i32,
                },
            })
            .collect();
        Ok(Response::new(remexec::BatchReadBlobsResponse {
            responses,
        }))
    }

    type GetTreeStream = ResponseStream<remexec::GetTreeResponse>;

    async fn get_tree(
        &self,
        _request: Request<remexec::GetTreeRequest>,
    ) -> Result<Response<Self::GetTreeStream>, Status> {
        Err(Status::unimplemented("StubCas does not serve GetTree"))
    }
}

#[tonic::async_trait]
impl ActionCache for StubCasResponder {
    async fn get_action_result(
        &self,
        request: Request<remexec::GetActionResultRequest>,
    ) -> Result<Response<remexec::ActionResult>, Status> {
        RequestType::AcGetActionResult.record(&self.request_counts);
        self.check_always_errors()?;
        let request = request.into_inner();
        let digest = request
            .action_digest
            .ok_or_else(|| Status::invalid_argument("Missing action digest"))?;
        self.action_results
            .lock()
            .get(&digest.hash)
            .cloned()
            .map(Response::new)
            .ok_or_else(|| Status::not_found("Action result does not exist"))
    }

    async fn update_action_result(
        &self,
        request: Request<remexec::UpdateActionResultRequest>,
    ) -> Result<Response<remexec::ActionResult>, Status> {
        RequestType::AcUpdateActionResult.record(&self.request_counts);
        self.check_always_errors()?;
        let request = request.into_inner();
        let digest = request
            .action_digest
            .ok_or_else(|| Status::invalid_argument("Missing action digest"))?;
        let action_result = request
            .action_result
            .ok_or_else(|| Status::invalid_argument("Missing action result"))?;
        self.action_results
            .lock()
            .insert(digest.hash, action_result.clone());
        Ok(Response::new(action_result))
    }
}

#[tonic::async_trait]
impl Capabilities for StubCasResponder {
    async fn get_capabilities(
        &self,
        _request: Request<remexec::GetCapabilitiesRequest>,
    ) -> Result<Response<remexec::ServerCapabilities>, Status> {
        Ok(Response::new(remexec::ServerCapabilities {
            cache_capabilities: Some(remexec::CacheCapabilities {
                digest_functions: vec![remexec::digest_function::Value::Sha256 as i32],
                action_cache_update_capabilities: Some(remexec::ActionCacheUpdateCapabilities {
                    update_enabled: true,
                }),
                max_batch_total_size_bytes: 0,
                symlink_absolute_path_strategy:
                    remexec::symlink_absolute_path_strategy::Value::Allowed as i32,
                supported_compressors: Vec::new(),
                supported_batch_update_compressors: Vec::new(),
            }),
            low_api_version: None,
            high_api_version: None,
        }))
    }
}

///
/// An in-process server speaking the remote execution protocol, for exercising gRPC-backed
/// storage code against a real wire round trip. Serves on an ephemeral port until dropped.
///
pub struct StubCas {
    address: String,
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
    request_counts: Arc<RequestCounter>,
    shutdown_sender: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Drop for StubCas {
    fn drop(&mut self) {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
    }
}

impl StubCas {
    pub fn builder() -> StubCasBuilder {
        StubCasBuilder::new()
    }

    pub async fn empty() -> StubCas {
        StubCas::builder().build().await
    }

    /// The http address to connect a channel to.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn request_count(&self, request_type: RequestType) -> usize {
        self.request_counts
            .lock()
            .get(&request_type)
            .copied()
            .unwrap_or(0)
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.blobs.lock().contains_key(&digest.hash().to_hex())
    }

    pub fn blob(&self, digest: &Digest) -> Option<Bytes> {
        self.blobs.lock().get(&digest.hash().to_hex()).cloned()
    }
}

pub struct StubCasBuilder {
    chunk_size_bytes: usize,
    always_errors: bool,
    blobs: HashMap<String, Bytes>,
    action_results: HashMap<String, remexec::ActionResult>,
}

impl StubCasBuilder {
    pub fn new() -> StubCasBuilder {
        StubCasBuilder {
            chunk_size_bytes: 1024,
            always_errors: false,
            blobs: HashMap::new(),
            action_results: HashMap::new(),
        }
    }

    pub fn chunk_size_bytes(mut self, chunk_size_bytes: usize) -> Self {
        self.chunk_size_bytes = chunk_size_bytes;
        self
    }

    pub fn always_errors(mut self) -> Self {
        self.always_errors = true;
        self
    }

    pub fn file(mut self, data: &TestData, function: &Function) -> Self {
        self.blobs
            .insert(data.digest(function).hash().to_hex(), data.bytes());
        self
    }

    pub fn directory(mut self, directory: &TestDirectory, function: &Function) -> Self {
        self.blobs
            .insert(directory.digest(function).hash().to_hex(), directory.bytes());
        self
    }

    pub fn tree(mut self, tree: &TestTree, function: &Function) -> Self {
        self.blobs
            .insert(tree.digest(function).hash().to_hex(), tree.bytes());
        self
    }

    pub fn action_result(
        mut self,
        action_digest: &Digest,
        action_result: remexec::ActionResult,
    ) -> Self {
        self.action_results
            .insert(action_digest.hash().to_hex(), action_result);
        self
    }

    pub async fn build(self) -> StubCas {
        let responder = StubCasResponder {
            chunk_size_bytes: self.chunk_size_bytes,
            always_errors: self.always_errors,
            blobs: Arc::new(Mutex::new(self.blobs)),
            action_results: Arc::new(Mutex::new(self.action_results)),
            request_counts: Arc::new(Mutex::new(HashMap::new())),
        };
        let blobs = responder.blobs.clone();
        let request_counts = responder.request_counts.clone();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind StubCas listener");
        let local_addr: SocketAddr = listener.local_addr().unwrap();
        let (shutdown_sender, shutdown_receiver) = tokio::sync::oneshot::channel::<()>();

        let router = Server::builder()
            .add_service(ByteStreamServer::new(responder.clone()))
            .add_service(ContentAddressableStorageServer::new(responder.clone()))
            .add_service(ActionCacheServer::new(responder.clone()))
            .add_service(CapabilitiesServer::new(responder));
        tokio::spawn(async move {
            let _ = router
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = shutdown_receiver.await;
                })
                .await;
        });

        StubCas {
            address: format!("http://{local_addr}"),
            blobs,
            request_counts,
            shutdown_sender: Some(shutdown_sender),
        }
    }
}
