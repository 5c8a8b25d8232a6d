// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::io;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use hashing::Generator;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tonic::Status;

use crate::{ErrorHandler, Validation};

///
/// A pull-based sequence of byte chunks, the streaming form into which every Buffer can be
/// consumed. The end of the stream is signalled by `Ok(None)`; dropping a ChunkReader cancels
/// whatever source backs it.
///
#[async_trait]
pub trait ChunkReader: Send {
    async fn read(&mut self) -> Result<Option<Bytes>, Status>;
}

/// A random access reader, for sources that can serve reads at arbitrary offsets.
#[async_trait]
pub trait ReaderAt: Send + Sync {
    ///
    /// Reads up to `length` bytes at `offset`. A shorter result is only returned at the end of
    /// the data; an empty result means there is nothing at or after `offset`.
    ///
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, Status>;
}

#[async_trait]
impl ReaderAt for Bytes {
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, Status> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let end = start.saturating_add(length).min(self.len());
        Ok(self.slice(start..end))
    }
}

pub(crate) fn io_error_to_status(err: io::Error) -> Status {
    // Errors produced by Buffer::to_reader wrap the original Status; unwrap it rather than
    // flattening everything to a string.
    match err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<Status>())
    {
        Some(status) => status.clone(),
        None => Status::unknown(format!("I/O error: {err}")),
    }
}

/// Yields a single error, then behaves as an exhausted stream.
pub(crate) struct ErrorChunkReader {
    pub(crate) error: Option<Status>,
}

#[async_trait]
impl ChunkReader for ErrorChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

///
/// Serves chunks out of fully buffered data, running any pending validation before the first
/// chunk is handed out.
///
pub(crate) struct MemoryChunkReader {
    pub(crate) data: Bytes,
    pub(crate) validation: Option<Validation>,
    pub(crate) offset: u64,
    pub(crate) chunk_size: usize,
    pub(crate) position: Option<usize>,
    pub(crate) failed: bool,
}

#[async_trait]
impl ChunkReader for MemoryChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if self.failed {
            return Ok(None);
        }
        if let Some(validation) = self.validation.take() {
            if let Err(err) = validation.validate_bytes(&self.data) {
                self.failed = true;
                return Err(err);
            }
        }
        let position = match self.position {
            Some(position) => position,
            None => {
                let offset = usize::try_from(self.offset).unwrap_or(usize::MAX);
                if offset > self.data.len() {
                    self.failed = true;
                    return Err(Status::invalid_argument(format!(
                        "Offset {} exceeds the buffer size of {} bytes",
                        self.offset,
                        self.data.len()
                    )));
                }
                offset
            }
        };
        if position >= self.data.len() {
            self.position = Some(position);
            return Ok(None);
        }
        let end = position.saturating_add(self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(position..end);
        self.position = Some(end);
        Ok(Some(chunk))
    }
}

/// Reads sequential chunks out of an AsyncRead.
pub(crate) struct AsyncReadChunkReader {
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) chunk_size: usize,
}

#[async_trait]
impl ChunkReader for AsyncReadChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        let mut buf = BytesMut::with_capacity(self.chunk_size);
        let n = self
            .reader
            .read_buf(&mut buf)
            .await
            .map_err(io_error_to_status)?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(buf.freeze()))
        }
    }
}

/// Reads sequential chunks out of a ReaderAt.
pub(crate) struct ReaderAtChunkReader {
    pub(crate) reader: Box<dyn ReaderAt>,
    pub(crate) position: u64,
    pub(crate) end: u64,
    pub(crate) chunk_size: usize,
}

#[async_trait]
impl ChunkReader for ReaderAtChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if self.position >= self.end {
            return Ok(None);
        }
        let want = (self.end - self.position).min(self.chunk_size as u64) as usize;
        let chunk = self.reader.read_at(self.position, want).await?;
        if chunk.is_empty() {
            return Err(Status::internal(format!(
                "Reader returned no data at offset {}, while {} more bytes were expected",
                self.position,
                self.end - self.position
            )));
        }
        self.position += chunk.len() as u64;
        Ok(Some(chunk))
    }
}

///
/// Passes chunks through while hashing them, verifying the checksum and size against the
/// expected digest once the underlying stream is exhausted.
///
pub(crate) struct ValidatingChunkReader {
    pub(crate) inner: Box<dyn ChunkReader>,
    pub(crate) generator: Option<Generator>,
    pub(crate) validation: Validation,
    pub(crate) seen_bytes: u64,
}

#[async_trait]
impl ChunkReader for ValidatingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        let generator = match self.generator.as_mut() {
            Some(generator) => generator,
            // Validation already concluded.
            None => return Ok(None),
        };
        match self.inner.read().await? {
            Some(chunk) => {
                generator.update(&chunk);
                self.seen_bytes += chunk.len() as u64;
                if let Some(expected) = self.validation.expected_size_bytes() {
                    if self.seen_bytes > expected {
                        self.generator = None;
                        return Err(self.validation.size_mismatch(self.seen_bytes));
                    }
                }
                Ok(Some(chunk))
            }
            None => {
                let generator = self.generator.take().unwrap();
                self.validation.validate_digest(generator.finish())?;
                Ok(None)
            }
        }
    }
}

/// Skips a prefix of the underlying stream, so that validation still sees every byte.
pub(crate) struct OffsetChunkReader {
    pub(crate) inner: Box<dyn ChunkReader>,
    pub(crate) remaining_skip: u64,
}

#[async_trait]
impl ChunkReader for OffsetChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        loop {
            match self.inner.read().await? {
                Some(chunk) => {
                    if self.remaining_skip == 0 {
                        return Ok(Some(chunk));
                    }
                    let len = chunk.len() as u64;
                    if len <= self.remaining_skip {
                        self.remaining_skip -= len;
                    } else {
                        let start = self.remaining_skip as usize;
                        self.remaining_skip = 0;
                        return Ok(Some(chunk.slice(start..)));
                    }
                }
                None => {
                    if self.remaining_skip > 0 {
                        self.remaining_skip = 0;
                        return Err(Status::invalid_argument(
                            "Offset exceeds the size of the buffer",
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }
}

///
/// Fully buffers the underlying stream on first use, so that a message-typed buffer can be
/// validated by decoding before any of its bytes are handed out.
///
pub(crate) struct BufferingChunkReader {
    pub(crate) inner: Option<Box<dyn ChunkReader>>,
    pub(crate) validation: Option<Validation>,
    pub(crate) resolved: Option<MemoryChunkReader>,
    pub(crate) offset: u64,
    pub(crate) chunk_size: usize,
}

#[async_trait]
impl ChunkReader for BufferingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        if self.resolved.is_none() {
            let mut inner = match self.inner.take() {
                Some(inner) => inner,
                None => return Ok(None),
            };
            let mut data = BytesMut::new();
            while let Some(chunk) = inner.read().await? {
                data.extend_from_slice(&chunk);
            }
            self.resolved = Some(MemoryChunkReader {
                data: data.freeze(),
                validation: self.validation.take(),
                offset: self.offset,
                chunk_size: self.chunk_size,
                position: None,
                failed: false,
            });
        }
        self.resolved.as_mut().unwrap().read().await
    }
}

///
/// Consults an ErrorHandler whenever the underlying stream fails. A replacement Buffer resumes
/// at the offset that was already emitted to the caller, so consumers observe one contiguous
/// stream.
///
pub(crate) struct ErrorHandlingChunkReader {
    pub(crate) current: Box<dyn ChunkReader>,
    pub(crate) handler: Option<Box<dyn ErrorHandler>>,
    pub(crate) base_offset: u64,
    pub(crate) emitted_bytes: u64,
    pub(crate) chunk_size: usize,
}

impl ErrorHandlingChunkReader {
    fn finish_handler(&mut self) {
        if let Some(mut handler) = self.handler.take() {
            handler.done();
        }
    }
}

#[async_trait]
impl ChunkReader for ErrorHandlingChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        loop {
            match self.current.read().await {
                Ok(Some(chunk)) => {
                    self.emitted_bytes += chunk.len() as u64;
                    return Ok(Some(chunk));
                }
                Ok(None) => {
                    self.finish_handler();
                    return Ok(None);
                }
                Err(err) => {
                    let handler = match self.handler.as_mut() {
                        Some(handler) => handler,
                        None => return Err(err),
                    };
                    match handler.on_error(err).await {
                        Ok(replacement) => {
                            self.current = replacement.to_chunk_reader(
                                self.base_offset + self.emitted_bytes,
                                self.chunk_size,
                            );
                        }
                        Err(err) => {
                            self.finish_handler();
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}

impl Drop for ErrorHandlingChunkReader {
    fn drop(&mut self) {
        // Done must be idempotent, so discarding after completion is harmless.
        self.finish_handler();
    }
}

/// Joins a background task once the stream is exhausted, merging its error into the read.
pub(crate) struct BackgroundJoinChunkReader {
    pub(crate) inner: Box<dyn ChunkReader>,
    pub(crate) task: Option<tokio::task::JoinHandle<Result<(), Status>>>,
}

#[async_trait]
impl ChunkReader for BackgroundJoinChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        match self.inner.read().await? {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                if let Some(task) = self.task.take() {
                    crate::join_background_task(task).await?;
                }
                Ok(None)
            }
        }
    }
}

/// The consuming half of a cloned stream: chunks arrive from the pump task feeding both clones.
pub(crate) struct ChannelChunkReader {
    pub(crate) receiver: mpsc::Receiver<Result<Bytes, Status>>,
}

#[async_trait]
impl ChunkReader for ChannelChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>, Status> {
        match self.receiver.recv().await {
            None => Ok(None),
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err),
        }
    }
}
