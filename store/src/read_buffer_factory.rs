// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::Arc;

use buffer::{Buffer, BufferSource, DataIntegrityCallback, ReaderAt};
use cache::ExistenceCache;
use hashing::{Digest, DigestSet};
use parking_lot::Mutex;
use protos::gen::build::bazel::remote::execution::v2::ActionResult;

///
/// How a storage backend turns raw stored data back into Buffers. The factory decides which
/// integrity policy applies: content addressed blobs are re-hashed, action results are
/// validated by decoding. Backends call the reparation callback through the factory, so a
/// corrupted blob can be evicted at the source.
///
pub trait ReadBufferFactory: Send + Sync + 'static {
    /// Creates a Buffer for a blob the backend holds in memory.
    fn new_buffer_from_byte_slice(
        &self,
        digest: &Digest,
        data: bytes::Bytes,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer;

    /// Creates a Buffer for a blob served by a random access reader.
    fn new_buffer_from_reader_at(
        &self,
        digest: &Digest,
        reader: Box<dyn ReaderAt>,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer;
}

fn backend_source(callback: Option<DataIntegrityCallback>) -> BufferSource {
    match callback {
        Some(callback) => BufferSource::reparable(callback),
        None => BufferSource::irreparable(),
    }
}

/// The factory for Content Addressable Storage backends: contents are checked against the
/// digest they are stored under.
pub struct CasReadBufferFactory;

impl ReadBufferFactory for CasReadBufferFactory {
    fn new_buffer_from_byte_slice(
        &self,
        digest: &Digest,
        data: bytes::Bytes,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer {
        Buffer::from_cas_bytes(digest, data, backend_source(callback))
    }

    fn new_buffer_from_reader_at(
        &self,
        digest: &Digest,
        reader: Box<dyn ReaderAt>,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer {
        Buffer::from_cas_reader_at(digest, reader, backend_source(callback))
    }
}

/// The factory for Action Cache backends: action results are not content addressed, so the
/// contents are validated by decoding them.
pub struct ActionCacheReadBufferFactory;

impl ReadBufferFactory for ActionCacheReadBufferFactory {
    fn new_buffer_from_byte_slice(
        &self,
        digest: &Digest,
        data: bytes::Bytes,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer {
        let _ = digest;
        Buffer::from_proto_bytes::<ActionResult>(data, backend_source(callback))
    }

    fn new_buffer_from_reader_at(
        &self,
        digest: &Digest,
        reader: Box<dyn ReaderAt>,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer {
        Buffer::from_proto_reader_at::<ActionResult>(
            reader,
            digest.size_bytes(),
            backend_source(callback),
        )
    }
}

///
/// Short-circuits integrity checking for blobs that were validated recently. The first read
/// of a blob runs the base factory's full check; a success is recorded in an existence cache,
/// and while the record lasts, subsequent reads get validated buffers. For random access
/// sources this is what makes repeated `to_reader_at` consumption possible at all, since
/// checksumming requires a sequential pass.
///
/// A failed check removes the record and falls through to the caller's reparation callback.
///
pub struct ValidationCachingReadBufferFactory {
    base: Arc<dyn ReadBufferFactory>,
    cache: Arc<Mutex<ExistenceCache>>,
}

impl ValidationCachingReadBufferFactory {
    pub fn new(
        base: Arc<dyn ReadBufferFactory>,
        cache: ExistenceCache,
    ) -> ValidationCachingReadBufferFactory {
        ValidationCachingReadBufferFactory {
            base,
            cache: Arc::new(Mutex::new(cache)),
        }
    }

    fn is_known_valid(&self, digest: &Digest) -> bool {
        self.cache
            .lock()
            .remove_existing(&DigestSet::single(digest.clone()))
            .is_empty()
    }

    fn caching_callback(
        &self,
        digest: &Digest,
        callback: Option<DataIntegrityCallback>,
    ) -> Option<DataIntegrityCallback> {
        let cache = self.cache.clone();
        let digest = digest.clone();
        Some(Arc::new(move |valid: bool| {
            {
                let mut cache = cache.lock();
                if valid {
                    cache.add(&DigestSet::single(digest.clone()));
                } else {
                    cache.remove(&digest);
                }
            }
            if let Some(callback) = &callback {
                callback(valid);
            }
        }))
    }
}

impl ReadBufferFactory for ValidationCachingReadBufferFactory {
    fn new_buffer_from_byte_slice(
        &self,
        digest: &Digest,
        data: bytes::Bytes,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer {
        if self.is_known_valid(digest) {
            return Buffer::from_validated_bytes(data);
        }
        self.base
            .new_buffer_from_byte_slice(digest, data, self.caching_callback(digest, callback))
    }

    fn new_buffer_from_reader_at(
        &self,
        digest: &Digest,
        reader: Box<dyn ReaderAt>,
        callback: Option<DataIntegrityCallback>,
    ) -> Buffer {
        if self.is_known_valid(digest) {
            return Buffer::from_validated_reader_at(reader, digest.size_bytes());
        }
        self.base
            .new_buffer_from_reader_at(digest, reader, self.caching_callback(digest, callback))
    }
}
