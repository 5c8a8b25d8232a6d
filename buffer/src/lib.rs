// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;
use hashing::Digest;
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::Status;

mod readers;
pub use crate::readers::{ChunkReader, ReaderAt};
use crate::readers::{
    io_error_to_status, AsyncReadChunkReader, BackgroundJoinChunkReader, BufferingChunkReader,
    ChannelChunkReader, ErrorChunkReader, ErrorHandlingChunkReader, MemoryChunkReader,
    OffsetChunkReader, ReaderAtChunkReader, ValidatingChunkReader,
};


/// The chunk size used when a consumer does not express a preference.
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 64 * 1024;

/// The per-consumer chunk capacity of the pump behind `Buffer::clone_stream`.
const CLONE_STREAM_CAPACITY: usize = 1;

///
/// Invoked by BackendProvided buffers once the integrity of the data is known: `true` after a
/// successful checksum validation, `false` on corruption. Backends use the latter to evict the
/// corrupted copy, and validation caches use the former to skip future checks.
///
pub type DataIntegrityCallback = Arc<dyn Fn(bool) + Send + Sync>;

///
/// Who is responsible for the integrity of the data in a Buffer.
///
/// Data offered by a client is the client's problem: a checksum mismatch is an InvalidArgument
/// error and nothing needs repairing. Data served by a backend is supposed to have been
/// validated on the way in, so a mismatch is an Internal error, reported to the reparation
/// callback when one is attached.
///
#[derive(Clone)]
pub enum BufferSource {
    UserProvided,
    BackendProvided(Option<DataIntegrityCallback>),
}

impl BufferSource {
    /// A BackendProvided source whose corrupted blobs cannot be repaired.
    pub fn irreparable() -> BufferSource {
        BufferSource::BackendProvided(None)
    }

    /// A BackendProvided source with a reparation hook.
    pub fn reparable(callback: DataIntegrityCallback) -> BufferSource {
        BufferSource::BackendProvided(Some(callback))
    }

    fn integrity_failure(&self, message: String) -> Status {
        match self {
            BufferSource::UserProvided => Status::invalid_argument(message),
            BufferSource::BackendProvided(callback) => {
                if let Some(callback) = callback {
                    callback(false);
                }
                Status::internal(message)
            }
        }
    }

    fn report_valid(&self) {
        if let BufferSource::BackendProvided(Some(callback)) = self {
            callback(true);
        }
    }
}

#[derive(Clone)]
pub(crate) enum Validation {
    Checksum {
        digest: Digest,
        source: BufferSource,
    },
    Message {
        check: Arc<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>,
        source: BufferSource,
    },
}

impl Validation {
    pub(crate) fn expected_size_bytes(&self) -> Option<u64> {
        match self {
            Validation::Checksum { digest, .. } => Some(digest.size_bytes()),
            Validation::Message { .. } => None,
        }
    }

    pub(crate) fn validate_bytes(&self, data: &Bytes) -> Result<(), Status> {
        match self {
            Validation::Checksum { digest, .. } => {
                let mut generator = digest.function().new_generator();
                generator.update(data);
                self.validate_digest(generator.finish())
            }
            Validation::Message { check, source } => match check(data) {
                Ok(()) => {
                    source.report_valid();
                    Ok(())
                }
                Err(err) => Err(source.integrity_failure(format!(
                    "Failed to unmarshal message: {err}"
                ))),
            },
        }
    }

    pub(crate) fn validate_digest(&self, actual: Digest) -> Result<(), Status> {
        match self {
            Validation::Checksum { digest, source } => {
                if actual.size_bytes() != digest.size_bytes() {
                    Err(source.integrity_failure(format!(
                        "Buffer is {} bytes in size, while {} bytes were expected",
                        actual.size_bytes(),
                        digest.size_bytes()
                    )))
                } else if actual.hash() != digest.hash() {
                    Err(source.integrity_failure(format!(
                        "Buffer has checksum {}, while {} was expected",
                        actual.hash(),
                        digest.hash()
                    )))
                } else {
                    source.report_valid();
                    Ok(())
                }
            }
            Validation::Message { .. } => Ok(()),
        }
    }

    pub(crate) fn size_mismatch(&self, seen_bytes: u64) -> Status {
        match self {
            Validation::Checksum { digest, source } => source.integrity_failure(format!(
                "Buffer is at least {} bytes in size, while {} bytes were expected",
                seen_bytes,
                digest.size_bytes()
            )),
            Validation::Message { source, .. } => {
                source.integrity_failure(format!("Buffer is at least {seen_bytes} bytes in size"))
            }
        }
    }
}

///
/// A handler consulted when consuming a Buffer fails. It may return a replacement Buffer to
/// resume reading from a different source, or surface the (possibly rewritten) error. A new
/// error handler may be installed on the replacement Buffer. `done` is called exactly when the
/// handler will no longer be consulted, and must be idempotent.
///
#[async_trait]
pub trait ErrorHandler: Send + 'static {
    async fn on_error(&mut self, err: Status) -> Result<Buffer, Status>;

    fn done(&mut self) {}
}

enum State {
    /// Carries a non-retryable error to whoever consumes the buffer.
    Error(Status),
    /// Fully in-memory data, with validation still to run unless it was trusted at construction.
    Memory {
        data: Bytes,
        validation: Option<Validation>,
    },
    /// A pre-validated random access source of known size.
    ReaderAt {
        reader: Box<dyn ReaderAt>,
        size_bytes: u64,
    },
    /// A sequential source. The declared size is unknown only for message-typed readers.
    Stream {
        reader: Box<dyn ChunkReader>,
        size_bytes: Option<u64>,
        validation: Option<Validation>,
    },
    WithErrorHandler {
        inner: Box<Buffer>,
        handler: Box<dyn ErrorHandler>,
    },
    WithBackgroundTask {
        inner: Box<Buffer>,
        task: JoinHandle<Result<(), Status>>,
    },
}

pub(crate) async fn join_background_task(task: JoinHandle<Result<(), Status>>) -> Result<(), Status> {
    match task.await {
        Ok(result) => result,
        Err(err) => Err(Status::internal(format!("Background task panicked: {err}"))),
    }
}

///
/// A pending sequence of bytes of declared size, to be consumed exactly once.
///
/// Ownership is the lifecycle: every terminal operation takes the Buffer by value, so the type
/// system enforces that a Buffer is consumed by exactly one of `to_byte_slice`, `to_proto`,
/// `to_chunk_reader`, `to_reader`, `to_reader_at`, `into_writer` or `discard`. The `clone_*`
/// operations are the only way to obtain two consumers, and they return two distinct owners.
///
pub struct Buffer {
    state: State,
}

impl Buffer {
    /// Data that is known to be correct, e.g. because it was just produced locally.
    pub fn from_validated_bytes(data: Bytes) -> Buffer {
        Buffer {
            state: State::Memory {
                data,
                validation: None,
            },
        }
    }

    /// A pre-validated random access source of known size.
    pub fn from_validated_reader_at(reader: Box<dyn ReaderAt>, size_bytes: u64) -> Buffer {
        Buffer {
            state: State::ReaderAt { reader, size_bytes },
        }
    }

    /// Content addressed data held in memory, to be checked against its digest on consumption.
    pub fn from_cas_bytes(digest: &Digest, data: Bytes, source: BufferSource) -> Buffer {
        Buffer {
            state: State::Memory {
                data,
                validation: Some(Validation::Checksum {
                    digest: digest.clone(),
                    source,
                }),
            },
        }
    }

    /// Content addressed data arriving from a sequential reader, hashed while it streams.
    pub fn from_cas_reader(
        digest: &Digest,
        reader: impl AsyncRead + Send + Unpin + 'static,
        source: BufferSource,
    ) -> Buffer {
        Buffer::from_cas_chunk_reader(
            digest,
            Box::new(AsyncReadChunkReader {
                reader: Box::new(reader),
                chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            }),
            source,
        )
    }

    /// Content addressed data arriving in chunks, hashed while it streams.
    pub fn from_cas_chunk_reader(
        digest: &Digest,
        reader: Box<dyn ChunkReader>,
        source: BufferSource,
    ) -> Buffer {
        Buffer {
            state: State::Stream {
                reader,
                size_bytes: Some(digest.size_bytes()),
                validation: Some(Validation::Checksum {
                    digest: digest.clone(),
                    source,
                }),
            },
        }
    }

    ///
    /// Content addressed data served by a random access reader that still needs checking.
    /// Hashing requires one sequential pass, so the result does not support `to_reader_at`;
    /// sources that want to serve repeated random access reads cheaply wrap this in a
    /// validation cache and construct a validated buffer once the contents have checked out.
    ///
    pub fn from_cas_reader_at(
        digest: &Digest,
        reader: Box<dyn ReaderAt>,
        source: BufferSource,
    ) -> Buffer {
        Buffer {
            state: State::Stream {
                reader: Box::new(ReaderAtChunkReader {
                    reader,
                    position: 0,
                    end: digest.size_bytes(),
                    chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
                }),
                size_bytes: Some(digest.size_bytes()),
                validation: Some(Validation::Checksum {
                    digest: digest.clone(),
                    source,
                }),
            },
        }
    }

    /// Serialized message data of known size served by a random access reader.
    pub fn from_proto_reader_at<M: Message + Default>(
        reader: Box<dyn ReaderAt>,
        size_bytes: u64,
        source: BufferSource,
    ) -> Buffer {
        Buffer {
            state: State::Stream {
                reader: Box::new(ReaderAtChunkReader {
                    reader,
                    position: 0,
                    end: size_bytes,
                    chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
                }),
                size_bytes: Some(size_bytes),
                validation: Some(Validation::Message {
                    check: Arc::new(|data| {
                        M::decode(data).map(|_| ()).map_err(|e| e.to_string())
                    }),
                    source,
                }),
            },
        }
    }

    /// A message that already exists in decoded form.
    pub fn from_proto<M: Message>(message: &M) -> Buffer {
        Buffer::from_validated_bytes(Bytes::from(message.encode_to_vec()))
    }

    /// Serialized message data, validated by decoding it as `M` before it is handed out.
    pub fn from_proto_bytes<M: Message + Default>(data: Bytes, source: BufferSource) -> Buffer {
        Buffer {
            state: State::Memory {
                data,
                validation: Some(Validation::Message {
                    check: Arc::new(|data| {
                        M::decode(data).map(|_| ()).map_err(|e| e.to_string())
                    }),
                    source,
                }),
            },
        }
    }

    /// Serialized message data arriving from a sequential reader. The size is unknown until
    /// the reader is exhausted.
    pub fn from_proto_reader<M: Message + Default>(
        reader: impl AsyncRead + Send + Unpin + 'static,
        source: BufferSource,
    ) -> Buffer {
        Buffer {
            state: State::Stream {
                reader: Box::new(AsyncReadChunkReader {
                    reader: Box::new(reader),
                    chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
                }),
                size_bytes: None,
                validation: Some(Validation::Message {
                    check: Arc::new(|data| {
                        M::decode(data).map(|_| ()).map_err(|e| e.to_string())
                    }),
                    source,
                }),
            },
        }
    }

    /// A buffer whose consumption yields the given error.
    pub fn from_error(status: Status) -> Buffer {
        Buffer {
            state: State::Error(status),
        }
    }

    ///
    /// Installs an error handler that is consulted whenever consuming this buffer fails. The
    /// handler may hand back a replacement Buffer, against which the read resumes at the offset
    /// that was already emitted.
    ///
    pub fn with_error_handler(self, handler: Box<dyn ErrorHandler>) -> Buffer {
        Buffer {
            state: State::WithErrorHandler {
                inner: Box::new(self),
                handler,
            },
        }
    }

    ///
    /// Attaches asynchronous work whose outcome belongs to this buffer, e.g. a replication that
    /// runs while the caller reads. The task starts immediately; its error is merged into the
    /// terminal operation, or logged and suppressed when the buffer is discarded.
    ///
    /// Must be called from a tokio runtime context.
    ///
    pub fn with_background_task(
        self,
        task: impl std::future::Future<Output = Result<(), Status>> + Send + 'static,
    ) -> Buffer {
        let task = tokio::spawn(async move {
            let result = task.await;
            if let Err(err) = &result {
                log::debug!("Buffer background task failed: {err}");
            }
            result
        });
        Buffer {
            state: State::WithBackgroundTask {
                inner: Box::new(self),
                task,
            },
        }
    }

    /// The declared size of this buffer in bytes. Non-destructive.
    pub fn get_size_bytes(&self) -> Result<u64, Status> {
        match &self.state {
            State::Error(err) => Err(err.clone()),
            State::Memory { data, .. } => Ok(data.len() as u64),
            State::ReaderAt { size_bytes, .. } => Ok(*size_bytes),
            State::Stream {
                size_bytes: Some(size_bytes),
                ..
            } => Ok(*size_bytes),
            State::Stream {
                size_bytes: None, ..
            } => Err(Status::unimplemented(
                "The size of this buffer is not known until it has been consumed",
            )),
            State::WithErrorHandler { inner, .. } => inner.get_size_bytes(),
            State::WithBackgroundTask { inner, .. } => inner.get_size_bytes(),
        }
    }

    ///
    /// Consumes the buffer into contiguous bytes, enforcing the size limit and running the
    /// integrity policy.
    ///
    pub async fn to_byte_slice(self, max_size_bytes: usize) -> Result<Bytes, Status> {
        if let Ok(size) = self.get_size_bytes() {
            if size > max_size_bytes as u64 {
                self.discard();
                return Err(Status::invalid_argument(format!(
                    "Buffer is {size} bytes in size, while a maximum of {max_size_bytes} bytes is permitted"
                )));
            }
        }
        let Buffer { state } = self;
        match state {
            // Fast path: no copying for data already in memory.
            State::Memory { data, validation } => {
                if let Some(validation) = validation {
                    validation.validate_bytes(&data)?;
                }
                Ok(data)
            }
            state => {
                let mut reader = Buffer { state }.to_chunk_reader(0, DEFAULT_CHUNK_SIZE_BYTES);
                let mut out = BytesMut::new();
                while let Some(chunk) = reader.read().await? {
                    if out.len() + chunk.len() > max_size_bytes {
                        return Err(Status::invalid_argument(format!(
                            "Buffer exceeds the maximum size of {max_size_bytes} bytes"
                        )));
                    }
                    out.extend_from_slice(&chunk);
                }
                Ok(out.freeze())
            }
        }
    }

    /// Consumes the buffer by decoding it as a message of type `M`.
    pub async fn to_proto<M: Message + Default>(self, max_size_bytes: usize) -> Result<M, Status> {
        let data = self.to_byte_slice(max_size_bytes).await?;
        M::decode(data)
            .map_err(|e| Status::invalid_argument(format!("Failed to unmarshal message: {e}")))
    }

    ///
    /// Consumes the buffer into a lazy sequence of chunks starting at `offset`. The chunk size
    /// is advisory: sources that already produce chunks hand them through as is. Integrity
    /// checking covers the full contents even when an offset skips a prefix.
    ///
    pub fn to_chunk_reader(self, offset: u64, chunk_size: usize) -> Box<dyn ChunkReader> {
        match self.state {
            State::Error(err) => Box::new(ErrorChunkReader { error: Some(err) }),
            State::Memory { data, validation } => Box::new(MemoryChunkReader {
                data,
                validation,
                offset,
                chunk_size,
                position: None,
                failed: false,
            }),
            State::ReaderAt { reader, size_bytes } => Box::new(ReaderAtChunkReader {
                reader,
                position: offset,
                end: size_bytes,
                chunk_size,
            }),
            State::Stream {
                reader, validation, ..
            } => match validation {
                Some(Validation::Checksum { digest, source }) => {
                    let generator = digest.function().new_generator();
                    let validating = Box::new(ValidatingChunkReader {
                        inner: reader,
                        generator: Some(generator),
                        validation: Validation::Checksum { digest, source },
                        seen_bytes: 0,
                    });
                    if offset == 0 {
                        validating
                    } else {
                        Box::new(OffsetChunkReader {
                            inner: validating,
                            remaining_skip: offset,
                        })
                    }
                }
                Some(validation @ Validation::Message { .. }) => Box::new(BufferingChunkReader {
                    inner: Some(reader),
                    validation: Some(validation),
                    resolved: None,
                    offset,
                    chunk_size,
                }),
                None => {
                    if offset == 0 {
                        reader
                    } else {
                        Box::new(OffsetChunkReader {
                            inner: reader,
                            remaining_skip: offset,
                        })
                    }
                }
            },
            State::WithErrorHandler { inner, handler } => Box::new(ErrorHandlingChunkReader {
                current: inner.to_chunk_reader(offset, chunk_size),
                handler: Some(handler),
                base_offset: offset,
                emitted_bytes: 0,
                chunk_size,
            }),
            State::WithBackgroundTask { inner, task } => Box::new(BackgroundJoinChunkReader {
                inner: inner.to_chunk_reader(offset, chunk_size),
                task: Some(task),
            }),
        }
    }

    /// Consumes the buffer into a sequential reader. Dropping the reader cancels the source.
    pub fn to_reader(self) -> Box<dyn AsyncRead + Send + Unpin> {
        let reader = self.to_chunk_reader(0, DEFAULT_CHUNK_SIZE_BYTES);
        let stream = futures::stream::try_unfold(reader, |mut reader| async move {
            match reader.read().await {
                Ok(Some(chunk)) => Ok(Some((chunk, reader))),
                Ok(None) => Ok(None),
                Err(status) => Err(io::Error::other(status)),
            }
        });
        Box::new(tokio_util::io::StreamReader::new(Box::pin(stream)))
    }

    ///
    /// Consumes the buffer into a random access reader. Only buffers backed by memory or by a
    /// random access source support this; streaming buffers fail with Unimplemented.
    ///
    pub async fn to_reader_at(self) -> Result<Box<dyn ReaderAt>, Status> {
        self.to_reader_at_boxed().await
    }

    fn to_reader_at_boxed(self) -> BoxFuture<'static, Result<Box<dyn ReaderAt>, Status>> {
        async move {
            match self.state {
                State::Error(err) => Err(err),
                State::Memory { data, validation } => {
                    if let Some(validation) = validation {
                        validation.validate_bytes(&data)?;
                    }
                    Ok(Box::new(data) as Box<dyn ReaderAt>)
                }
                State::ReaderAt { reader, .. } => Ok(reader),
                State::Stream { .. } => Err(Status::unimplemented(
                    "This buffer is backed by a stream, which does not support random access",
                )),
                State::WithErrorHandler { inner, mut handler } => {
                    let mut err = match inner.to_reader_at_boxed().await {
                        Ok(reader) => {
                            handler.done();
                            return Ok(reader);
                        }
                        Err(err) => err,
                    };
                    loop {
                        match handler.on_error(err).await {
                            Ok(replacement) => match replacement.to_reader_at_boxed().await {
                                Ok(reader) => {
                                    handler.done();
                                    return Ok(reader);
                                }
                                Err(next) => err = next,
                            },
                            Err(final_err) => {
                                handler.done();
                                return Err(final_err);
                            }
                        }
                    }
                }
                State::WithBackgroundTask { inner, task } => {
                    let result = inner.to_reader_at_boxed().await;
                    let task_result = join_background_task(task).await;
                    match (result, task_result) {
                        (Ok(reader), Ok(())) => Ok(reader),
                        (Err(err), _) => Err(err),
                        (_, Err(err)) => Err(err),
                    }
                }
            }
        }
        .boxed()
    }

    /// Consumes the buffer by streaming it into a writer, validating along the way.
    pub async fn into_writer<W: AsyncWrite + Send + Unpin + ?Sized>(
        self,
        writer: &mut W,
    ) -> Result<(), Status> {
        let mut reader = self.to_chunk_reader(0, DEFAULT_CHUNK_SIZE_BYTES);
        while let Some(chunk) = reader.read().await? {
            writer.write_all(&chunk).await.map_err(io_error_to_status)?;
        }
        Ok(())
    }

    ///
    /// Releases all resources held by the buffer. Errors carried by it (including errors of an
    /// attached background task) are suppressed; the background work itself keeps running.
    ///
    pub fn discard(self) {
        match self.state {
            State::WithErrorHandler { inner, mut handler } => {
                handler.done();
                inner.discard();
            }
            State::WithBackgroundTask { inner, task } => {
                // The spawned wrapper logs the task's error.
                drop(task);
                inner.discard();
            }
            _ => {}
        }
    }

    ///
    /// Splits the buffer into two independent consumers fed by a single read of the source,
    /// through a bounded pump: the source advances only as fast as the slower consumer, so one
    /// of the two must be consumed or discarded for the other to complete.
    ///
    /// Must be called from a tokio runtime context.
    ///
    pub fn clone_stream(self) -> (Buffer, Buffer) {
        match self.state {
            State::Error(err) => (
                Buffer::from_error(err.clone()),
                Buffer::from_error(err),
            ),
            State::Memory { data, validation } => (
                Buffer {
                    state: State::Memory {
                        data: data.clone(),
                        validation: validation.clone(),
                    },
                },
                Buffer {
                    state: State::Memory { data, validation },
                },
            ),
            state => {
                let buffer = Buffer { state };
                let size_bytes = buffer.get_size_bytes().ok();
                let mut reader = buffer.to_chunk_reader(0, DEFAULT_CHUNK_SIZE_BYTES);
                let (tx1, rx1) = mpsc::channel(CLONE_STREAM_CAPACITY);
                let (tx2, rx2) = mpsc::channel(CLONE_STREAM_CAPACITY);
                tokio::spawn(async move {
                    let mut senders = [Some(tx1), Some(tx2)];
                    loop {
                        match reader.read().await {
                            Ok(Some(chunk)) => {
                                let mut delivered = false;
                                for sender in senders.iter_mut() {
                                    if let Some(tx) = sender {
                                        if tx.send(Ok(chunk.clone())).await.is_err() {
                                            // This consumer was discarded; keep feeding the other.
                                            *sender = None;
                                        } else {
                                            delivered = true;
                                        }
                                    }
                                }
                                if !delivered {
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(err) => {
                                for sender in senders.iter_mut().flatten() {
                                    let _ = sender.send(Err(err.clone())).await;
                                }
                                break;
                            }
                        }
                    }
                });
                let make_clone = |receiver| Buffer {
                    state: State::Stream {
                        reader: Box::new(ChannelChunkReader { receiver }),
                        size_bytes,
                        // The pump already validates; the clones see checked data.
                        validation: None,
                    },
                };
                (make_clone(rx1), make_clone(rx2))
            }
        }
    }

    ///
    /// Splits the buffer by copying: when the declared size fits within `max_size_bytes` the
    /// contents are read eagerly into memory and shared, otherwise this falls back to
    /// `clone_stream`.
    ///
    pub async fn clone_copy(self, max_size_bytes: usize) -> (Buffer, Buffer) {
        match self.get_size_bytes() {
            Ok(size) if size <= max_size_bytes as u64 => {
                match self.to_byte_slice(max_size_bytes).await {
                    Ok(data) => (
                        Buffer::from_validated_bytes(data.clone()),
                        Buffer::from_validated_bytes(data),
                    ),
                    Err(err) => (Buffer::from_error(err.clone()), Buffer::from_error(err)),
                }
            }
            _ => self.clone_stream(),
        }
    }
}
