// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use hashing::{Digest, DigestSet, KeyFormat};
use parking_lot::Mutex;
use tonic::Status;

use crate::replication::{
    get_from_composite_from_sink_after_replication, get_from_sink_after_replication,
    BlobReplicator,
};
use crate::{BlobAccess, BlobSlicer};

/// A shared lock plus the number of handles referring to it.
type LockEntry = (Arc<tokio::sync::Mutex<()>>, usize);

///
/// A map of mutexes scoped to digest keys. Holding the lock for a key means being the only
/// task replicating that digest; entries are removed once nobody holds or waits on them.
///
struct KeyedLocks {
    locks: Mutex<HashMap<String, LockEntry>>,
}

struct KeyedLockHandle<'a> {
    owner: &'a KeyedLocks,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl KeyedLocks {
    fn new() -> KeyedLocks {
        KeyedLocks {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn acquire_handle(&self, key: String) -> KeyedLockHandle<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            let entry = locks
                .entry(key.clone())
                .or_insert_with(|| (Arc::new(tokio::sync::Mutex::new(())), 0));
            entry.1 += 1;
            entry.0.clone()
        };
        KeyedLockHandle {
            owner: self,
            key,
            lock,
        }
    }
}

impl Drop for KeyedLockHandle<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock();
        if let Some(entry) = locks.get_mut(&self.key) {
            entry.1 -= 1;
            if entry.1 == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

///
/// Ensures at most one concurrent replication per digest. Every caller first waits for the
/// digest's lock, then probes the sink: if a previous holder already replicated the blob, the
/// replication is skipped. Failures are not cached, so the next waiter simply tries again.
///
pub struct DeduplicatingBlobReplicator {
    base: Arc<dyn BlobReplicator>,
    sink: Arc<dyn BlobAccess>,
    key_format: KeyFormat,
    locks: KeyedLocks,
}

impl DeduplicatingBlobReplicator {
    pub fn new(
        base: Arc<dyn BlobReplicator>,
        sink: Arc<dyn BlobAccess>,
        key_format: KeyFormat,
    ) -> DeduplicatingBlobReplicator {
        DeduplicatingBlobReplicator {
            base,
            sink,
            key_format,
            locks: KeyedLocks::new(),
        }
    }

    async fn replicate_one(&self, digest: &Digest) -> Result<(), Status> {
        let handle = self.locks.acquire_handle(digest.get_key(self.key_format));
        let _guard = handle.lock.lock().await;
        let missing = self
            .sink
            .find_missing(DigestSet::single(digest.clone()))
            .await?;
        if missing.is_empty() {
            // A previous holder of the lock already replicated this blob.
            return Ok(());
        }
        self.base
            .replicate_multiple(DigestSet::single(digest.clone()))
            .await
    }
}

#[async_trait]
impl BlobReplicator for DeduplicatingBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        if let Err(err) = self.replicate_one(digest).await {
            return Buffer::from_error(err);
        }
        get_from_sink_after_replication(&self.sink, digest).await
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        if let Err(err) = self.replicate_one(parent_digest).await {
            return Buffer::from_error(err);
        }
        get_from_composite_from_sink_after_replication(
            &self.sink,
            parent_digest,
            child_digest,
            slicer,
        )
        .await
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status> {
        for digest in &digests {
            self.replicate_one(digest).await?;
        }
        Ok(())
    }
}
