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

//! A storage engine for large blobs over a wide-column database: blobs are split into
//! fixed-size segments stored as individual rows, with a metadata row pointing at them and
//! an orphan row marking uploads in progress for an external reaper.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use hashing::{Digest, InstanceName};
use parking_lot::Mutex;
use tonic::Status;

mod blob_access;
pub use crate::blob_access::WideColumnBlobAccess;

#[cfg(test)]
mod blob_access_tests;

///
/// The consistency level at which a single query runs. The engine pins these per table:
/// metadata commits must converge across datacenters, segment I/O only needs local
/// agreement, and last-access updates are allowed to be lost entirely.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsistencyLevel {
    One,
    LocalQuorum,
    EachQuorum,
}

/// The primary key of the metadata table.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MetadataKey {
    pub digest_function: String,
    pub digest_hash: String,
    pub digest_size_bytes: u64,
    pub digest_instance_name: String,
}

impl MetadataKey {
    /// The key under which a digest's metadata is stored, for a chosen instance name: reads
    /// probe the universal (empty instance name) pool before the scoped one.
    pub fn for_digest(digest: &Digest, instance_name: &InstanceName) -> MetadataKey {
        MetadataKey {
            digest_function: digest.digest_function().name().to_owned(),
            digest_hash: digest.hash().to_hex(),
            digest_size_bytes: digest.size_bytes(),
            digest_instance_name: instance_name.as_str().to_owned(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetadataRow {
    pub key: MetadataKey,
    pub blob_id: String,
    /// Milliseconds since the Unix epoch; best effort, see the last-access worker.
    pub last_access: i64,
    pub segment_count: u32,
    pub segment_size: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrphanRow {
    pub blob_id: String,
    pub digest_instance_name: String,
    pub digest_function: String,
    pub digest_hash: String,
    pub digest_size_bytes: u64,
    pub segment_count: u32,
    pub timestamp: i64,
}

///
/// The queries the engine issues, one method per (table, access pattern) pair. A production
/// deployment binds this to its wide-column database driver; the in-memory implementation
/// below serves tests and hermetic setups.
///
#[async_trait]
pub trait WideColumnClient: Send + Sync + 'static {
    async fn read_metadata(
        &self,
        key: &MetadataKey,
        consistency: ConsistencyLevel,
    ) -> Result<Option<MetadataRow>, Status>;

    async fn write_metadata(
        &self,
        row: &MetadataRow,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status>;

    async fn delete_metadata(
        &self,
        key: &MetadataKey,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status>;

    async fn update_last_access(
        &self,
        key: &MetadataKey,
        last_access: i64,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status>;

    async fn read_segment(
        &self,
        blob_id: &str,
        segment: u32,
        consistency: ConsistencyLevel,
    ) -> Result<Option<Bytes>, Status>;

    async fn segment_exists(
        &self,
        blob_id: &str,
        segment: u32,
        consistency: ConsistencyLevel,
    ) -> Result<bool, Status>;

    async fn write_segment(
        &self,
        blob_id: &str,
        segment: u32,
        content: Bytes,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status>;

    async fn write_orphan(
        &self,
        row: &OrphanRow,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status>;

    async fn delete_orphan(
        &self,
        blob_id: &str,
        digest_instance_name: &str,
        consistency: ConsistencyLevel,
    ) -> Result<(), Status>;
}

///
/// The three tables in hash maps. Consistency levels are accepted and ignored: a single
/// process is always consistent with itself.
///
#[derive(Default)]
pub struct MemoryWideColumnClient {
    metadata: Mutex<HashMap<MetadataKey, MetadataRow>>,
    content: Mutex<HashMap<(String, u32), Bytes>>,
    orphans: Mutex<HashMap<(String, String), OrphanRow>>,
}

impl MemoryWideColumnClient {
    pub fn new() -> MemoryWideColumnClient {
        MemoryWideColumnClient::default()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().len()
    }

    pub fn segment_count(&self) -> usize {
        self.content.lock().len()
    }

    pub fn metadata_row(&self, key: &MetadataKey) -> Option<MetadataRow> {
        self.metadata.lock().get(key).cloned()
    }

    /// Corrupts a stored segment, for exercising integrity failures.
    pub fn corrupt_segment(&self, blob_id: &str, segment: u32, content: Bytes) {
        self.content
            .lock()
            .insert((blob_id.to_owned(), segment), content);
    }
}

#[async_trait]
impl WideColumnClient for MemoryWideColumnClient {
    async fn read_metadata(
        &self,
        key: &MetadataKey,
        _consistency: ConsistencyLevel,
    ) -> Result<Option<MetadataRow>, Status> {
        Ok(self.metadata.lock().get(key).cloned())
    }

    async fn write_metadata(
        &self,
        row: &MetadataRow,
        _consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.metadata.lock().insert(row.key.clone(), row.clone());
        Ok(())
    }

    async fn delete_metadata(
        &self,
        key: &MetadataKey,
        _consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.metadata.lock().remove(key);
        Ok(())
    }

    async fn update_last_access(
        &self,
        key: &MetadataKey,
        last_access: i64,
        _consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        if let Some(row) = self.metadata.lock().get_mut(key) {
            row.last_access = last_access;
        }
        Ok(())
    }

    async fn read_segment(
        &self,
        blob_id: &str,
        segment: u32,
        _consistency: ConsistencyLevel,
    ) -> Result<Option<Bytes>, Status> {
        Ok(self
            .content
            .lock()
            .get(&(blob_id.to_owned(), segment))
            .cloned())
    }

    async fn segment_exists(
        &self,
        blob_id: &str,
        segment: u32,
        _consistency: ConsistencyLevel,
    ) -> Result<bool, Status> {
        Ok(self
            .content
            .lock()
            .contains_key(&(blob_id.to_owned(), segment)))
    }

    async fn write_segment(
        &self,
        blob_id: &str,
        segment: u32,
        content: Bytes,
        _consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.content
            .lock()
            .insert((blob_id.to_owned(), segment), content);
        Ok(())
    }

    async fn write_orphan(
        &self,
        row: &OrphanRow,
        _consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.orphans.lock().insert(
            (row.blob_id.clone(), row.digest_instance_name.clone()),
            row.clone(),
        );
        Ok(())
    }

    async fn delete_orphan(
        &self,
        blob_id: &str,
        digest_instance_name: &str,
        _consistency: ConsistencyLevel,
    ) -> Result<(), Status> {
        self.orphans
            .lock()
            .remove(&(blob_id.to_owned(), digest_instance_name.to_owned()));
        Ok(())
    }
}
