// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use buffer::{Buffer, BufferSource, ChunkReader};
use bytes::Bytes;
use futures::Stream;
use hashing::Digest;
use protos::gen::google::bytestream::byte_stream_server::ByteStream;
use protos::gen::google::bytestream::{
    QueryWriteStatusRequest, QueryWriteStatusResponse, ReadRequest, ReadResponse, WriteRequest,
    WriteResponse,
};
use store::BlobAccess;
use tonic::{Request, Response, Status, Streaming};

use crate::require_identity_compressor;

///
/// Feeds the chunks of an incoming byte stream write into whatever Buffer consumer the
/// backend chain is, preserving the client's back-pressure. Out-of-order offsets are
/// rejected, but replays of already received bytes (which retrying clients produce) are
/// skipped over.
///
struct WriteRequestChunkReader {
    stream: Streaming<WriteRequest>,
    first_chunk: Option<Bytes>,
    received_bytes: u64,
    finished: bool,
}

impl WriteRequestChunkReader {
    fn accept(&mut self, write_offset: i64, data: Bytes, finish_write: bool) -> Result<Option<Bytes>, Status> {
        let write_offset = u64::try_from(write_offset)
            .map_err(|_| Status::invalid_argument("Negative write offset"))?;
        if write_offset > self.received_bytes {
            return Err(Status::invalid_argument(format!(
                "Write at offset {write_offset} after only {} received bytes",
                self.received_bytes
            )));
        }
        let skip = (self.received_bytes - write_offset) as usize;
        self.finished = finish_write;
        if skip >= data.len() {
            // A full replay of bytes that already arrived.
            return Ok(None);
        }
        let fresh = data.slice(skip..);
        self.received_bytes += fresh.len() as u64;
        Ok(Some(fresh))
    }
}

#[async_trait]
impl ChunkReader for WriteRequestChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if let Some(first) = self.first_chunk.take() {
            if !first.is_empty() {
                self.received_bytes += first.len() as u64;
                return Ok(Some(first));
            }
        }
        loop {
            if self.finished {
                return Ok(None);
            }
            match self.stream.message().await? {
                Some(message) => {
                    if let Some(chunk) =
                        self.accept(message.write_offset, message.data, message.finish_write)?
                    {
                        return Ok(Some(chunk));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

/// Serves blob contents over the byte stream interface on top of a BlobAccess.
pub struct ByteStreamService {
    content_addressable_storage: Arc<dyn BlobAccess>,
    read_chunk_size_bytes: usize,
}

impl ByteStreamService {
    pub fn new(
        content_addressable_storage: Arc<dyn BlobAccess>,
        read_chunk_size_bytes: usize,
    ) -> ByteStreamService {
        ByteStreamService {
            content_addressable_storage,
            read_chunk_size_bytes,
        }
    }
}

#[tonic::async_trait]
impl ByteStream for ByteStreamService {
    type ReadStream =
        Pin<Box<dyn Stream<Item = Result<ReadResponse, Status>> + Send + 'static>>;

    async fn read(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<Self::ReadStream>, Status> {
        let request = request.into_inner();
        let (digest, compressor) = Digest::parse_byte_stream_read_path(&request.resource_name)?;
        require_identity_compressor(compressor)?;
        let read_offset = u64::try_from(request.read_offset)
            .map_err(|_| Status::invalid_argument("Negative read offset"))?;
        if request.read_limit < 0 {
            return Err(Status::invalid_argument("Negative read limit"));
        }
        let mut remaining_limit = match request.read_limit {
            0 => u64::MAX,
            limit => limit as u64,
        };

        let buffer = self.content_addressable_storage.get(&digest).await;
        let mut reader = buffer.to_chunk_reader(read_offset, self.read_chunk_size_bytes);
        let responses = async_stream::try_stream! {
            while remaining_limit > 0 {
                match reader.read().await? {
                    Some(mut data) => {
                        if (data.len() as u64) > remaining_limit {
                            data = data.slice(..remaining_limit as usize);
                        }
                        remaining_limit -= data.len() as u64;
                        yield ReadResponse { data };
                    }
                    None => break,
                }
            }
        };
        Ok(Response::new(Box::pin(responses)))
    }

    async fn write(
        &self,
        request: Request<Streaming<WriteRequest>>,
    ) -> Result<Response<WriteResponse>, Status> {
        let mut stream = request.into_inner();
        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("Write contained no messages"))?;
        let (digest, compressor) = Digest::parse_byte_stream_write_path(&first.resource_name)?;
        require_identity_compressor(compressor)?;
        if first.write_offset != 0 {
            return Err(Status::invalid_argument(
                "Writes must start at offset 0; resumption is not supported",
            ));
        }

        let reader = WriteRequestChunkReader {
            stream,
            finished: first.finish_write,
            first_chunk: Some(first.data),
            received_bytes: 0,
        };
        let buffer = Buffer::from_cas_chunk_reader(
            &digest,
            Box::new(reader),
            BufferSource::UserProvided,
        );
        self.content_addressable_storage.put(&digest, buffer).await?;
        Ok(Response::new(WriteResponse {
            committed_size: digest.size_bytes() as i64,
        }))
    }

    async fn query_write_status(
        &self,
        _request: Request<QueryWriteStatusRequest>,
    ) -> Result<Response<QueryWriteStatusResponse>, Status> {
        Err(Status::unimplemented(
            "Write status is not tracked; restart the upload",
        ))
    }
}
