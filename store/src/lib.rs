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

use std::sync::Arc;

use async_trait::async_trait;
use buffer::Buffer;
use grpc_util::prost::MessageExt;
use hashing::{Digest, DigestFunction, DigestSet, InstanceName};
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use remexec::ServerCapabilities;
use tonic::Status;

mod completeness_checking;
pub use crate::completeness_checking::CompletenessCheckingBlobAccess;

mod grpc;
pub use crate::grpc::{ActionCacheGrpcBlobAccess, CasGrpcBlobAccess};

mod hierarchical;
pub use crate::hierarchical::HierarchicalInstanceNamesBlobAccess;

mod memory;
pub use crate::memory::MemoryBlobAccess;

mod mirrored;
pub use crate::mirrored::MirroredBlobAccess;

mod read_buffer_factory;
pub use crate::read_buffer_factory::{
    ActionCacheReadBufferFactory, CasReadBufferFactory, ReadBufferFactory,
    ValidationCachingReadBufferFactory,
};

mod read_caching;
pub use crate::read_caching::ReadCachingBlobAccess;

mod read_fallback;
pub use crate::read_fallback::ReadFallbackBlobAccess;

pub mod replication;

#[cfg(test)]
mod completeness_checking_tests;
#[cfg(test)]
mod grpc_tests;
#[cfg(test)]
mod read_buffer_factory_tests;
#[cfg(test)]
mod read_fallback_tests;
#[cfg(test)]
pub(crate) mod testing;

///
/// The uniform storage interface of the system: every leaf backend and every decorator is a
/// BlobAccess, so deployments compose multi-tier topologies by stacking them.
///
/// Contract highlights:
/// * `get` returns a Buffer; errors may surface lazily when the Buffer is consumed.
/// * Every path that receives a Buffer and does not fully consume it calls `Buffer::discard`.
/// * A decorator never turns a transient error from an inner backend into NotFound, and never
///   downgrades Internal to NotFound.
/// * Cancellation is dropping the returned future; implementations only suspend on
///   cancel-safe primitives.
///
#[async_trait]
pub trait BlobAccess: Send + Sync + 'static {
    /// Fetches a blob.
    async fn get(&self, digest: &Digest) -> Buffer;

    /// Reads a slice out of a composite blob, e.g. a single Directory out of a Tree.
    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer;

    /// Stores a blob. The Buffer is fully consumed or discarded on every path.
    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status>;

    /// Reports which of the given digests are absent. The result is a subset of the input.
    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status>;

    /// Capabilities of this backend. Only meaningful for CAS and Action Cache backends;
    /// auxiliary caches fail with Unimplemented.
    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status>;
}

///
/// Extracts a child blob out of the contents of a parent blob. The parent Buffer is consumed;
/// the slicer returns a Buffer holding exactly the child's contents, or an error Buffer.
///
/// Slicers are shared: lazy retry paths may need to slice a replicated copy of the parent
/// long after the original call returned.
///
#[async_trait]
pub trait BlobSlicer: Send + Sync + 'static {
    async fn slice(&self, parent: Buffer, child_digest: &Digest) -> Buffer;
}

///
/// Slices an REv2 Tree message into one of the Directory messages contained in it, selected
/// by digest. This is how a single Directory is served out of a Tree stored as one blob.
///
pub struct TreeBlobSlicer {
    maximum_message_size_bytes: usize,
}

impl TreeBlobSlicer {
    pub fn new(maximum_message_size_bytes: usize) -> TreeBlobSlicer {
        TreeBlobSlicer {
            maximum_message_size_bytes,
        }
    }
}

#[async_trait]
impl BlobSlicer for TreeBlobSlicer {
    async fn slice(&self, parent: Buffer, child_digest: &Digest) -> Buffer {
        let tree: remexec::Tree = match parent.to_proto(self.maximum_message_size_bytes).await {
            Ok(tree) => tree,
            Err(err) => return Buffer::from_error(err),
        };
        let function = child_digest.function();
        for directory in tree.root.iter().chain(tree.children.iter()) {
            if &directory.to_digest(&function) == child_digest {
                return Buffer::from_validated_bytes(directory.to_bytes());
            }
        }
        Buffer::from_error(Status::not_found(format!(
            "Tree does not contain a directory with digest {child_digest}"
        )))
    }
}

///
/// The default `get_from_composite` of leaf backends: fetch the parent and slice it. Backends
/// that can serve subranges natively implement the method themselves instead.
///
pub async fn get_from_composite_via_get(
    backend: &dyn BlobAccess,
    parent_digest: &Digest,
    child_digest: &Digest,
    slicer: Arc<dyn BlobSlicer>,
) -> Buffer {
    let parent = backend.get(parent_digest).await;
    slicer.slice(parent, child_digest).await
}

/// Whether a backend stores content addressed blobs or action results. The two differ in
/// which operations are defined and in the capabilities they report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlobAccessKind {
    Cas,
    ActionCache,
}

const SUPPORTED_DIGEST_FUNCTIONS: [DigestFunction; 6] = [
    DigestFunction::Md5,
    DigestFunction::Sha1,
    DigestFunction::Sha256,
    DigestFunction::Sha384,
    DigestFunction::Sha512,
    DigestFunction::Blake3,
];

/// The wire values of every digest function this build supports.
pub fn supported_digest_function_values() -> Vec<i32> {
    SUPPORTED_DIGEST_FUNCTIONS
        .iter()
        .map(|f| i32::from(f.enum_value()))
        .collect()
}

/// The capabilities reported by a local backend of the given kind.
pub fn local_capabilities(kind: BlobAccessKind) -> ServerCapabilities {
    let cache_capabilities = match kind {
        BlobAccessKind::Cas => remexec::CacheCapabilities {
            digest_functions: supported_digest_function_values(),
            action_cache_update_capabilities: None,
            max_batch_total_size_bytes: 0,
            symlink_absolute_path_strategy: remexec::symlink_absolute_path_strategy::Value::Allowed
                as i32,
            supported_compressors: Vec::new(),
            supported_batch_update_compressors: Vec::new(),
        },
        BlobAccessKind::ActionCache => remexec::CacheCapabilities {
            digest_functions: supported_digest_function_values(),
            action_cache_update_capabilities: Some(remexec::ActionCacheUpdateCapabilities {
                update_enabled: true,
            }),
            max_batch_total_size_bytes: 0,
            symlink_absolute_path_strategy: remexec::symlink_absolute_path_strategy::Value::Allowed
                as i32,
            supported_compressors: Vec::new(),
            supported_batch_update_compressors: Vec::new(),
        },
    };
    ServerCapabilities {
        cache_capabilities: Some(cache_capabilities),
        low_api_version: Some(protos::gen::build::bazel::semver::SemVer {
            major: 2,
            minor: 0,
            patch: 0,
            prerelease: String::new(),
        }),
        high_api_version: Some(protos::gen::build::bazel::semver::SemVer {
            major: 2,
            minor: 3,
            patch: 0,
            prerelease: String::new(),
        }),
    }
}

///
/// Combines the capabilities of two backends that are served as one, e.g. the two sides of a
/// mirrored pair: a feature is only advertised when both sides support it.
///
pub fn merge_capabilities(a: &ServerCapabilities, b: &ServerCapabilities) -> ServerCapabilities {
    let cache_capabilities = match (&a.cache_capabilities, &b.cache_capabilities) {
        (Some(ca), Some(cb)) => Some(remexec::CacheCapabilities {
            digest_functions: ca
                .digest_functions
                .iter()
                .filter(|f| cb.digest_functions.contains(f))
                .copied()
                .collect(),
            action_cache_update_capabilities: match (
                &ca.action_cache_update_capabilities,
                &cb.action_cache_update_capabilities,
            ) {
                (Some(ua), Some(ub)) => Some(remexec::ActionCacheUpdateCapabilities {
                    update_enabled: ua.update_enabled && ub.update_enabled,
                }),
                _ => None,
            },
            max_batch_total_size_bytes: match (
                ca.max_batch_total_size_bytes,
                cb.max_batch_total_size_bytes,
            ) {
                (0, other) | (other, 0) => other,
                (sa, sb) => sa.min(sb),
            },
            symlink_absolute_path_strategy: if ca.symlink_absolute_path_strategy
                == remexec::symlink_absolute_path_strategy::Value::Allowed as i32
                && cb.symlink_absolute_path_strategy
                    == remexec::symlink_absolute_path_strategy::Value::Allowed as i32
            {
                remexec::symlink_absolute_path_strategy::Value::Allowed as i32
            } else {
                remexec::symlink_absolute_path_strategy::Value::Disallowed as i32
            },
            supported_compressors: ca
                .supported_compressors
                .iter()
                .filter(|c| cb.supported_compressors.contains(c))
                .copied()
                .collect(),
            supported_batch_update_compressors: ca
                .supported_batch_update_compressors
                .iter()
                .filter(|c| cb.supported_batch_update_compressors.contains(c))
                .copied()
                .collect(),
        }),
        _ => None,
    };
    ServerCapabilities {
        cache_capabilities,
        low_api_version: a.low_api_version.clone(),
        high_api_version: a.high_api_version.clone(),
    }
}
