// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use buffer::{Buffer, ErrorHandler};
use hashing::{Digest, DigestSet, DigestSetBuilder, InstanceName};
use protos::gen::build::bazel::remote::execution::v2::ServerCapabilities;
use tonic::{Code, Status};

use crate::{BlobAccess, BlobSlicer};

enum HierarchicalRead {
    Single,
    Composite {
        child_digest: Digest,
        slicer: Arc<dyn BlobSlicer>,
    },
}

struct HierarchicalErrorHandler {
    backend: Arc<dyn BlobAccess>,
    // Candidate digests still to try, most specific instance name first.
    remaining: Vec<Digest>,
    last_instance_name: InstanceName,
    read: HierarchicalRead,
}

impl HierarchicalErrorHandler {
    fn prefix(&self, err: Status) -> Status {
        Status::new(
            err.code(),
            format!(
                "Instance name {:?}: {}",
                self.last_instance_name.as_str(),
                err.message()
            ),
        )
    }
}

#[async_trait]
impl ErrorHandler for HierarchicalErrorHandler {
    async fn on_error(&mut self, err: Status) -> Result<Buffer, Status> {
        if err.code() != Code::NotFound {
            return Err(self.prefix(err));
        }
        let next = match self.remaining.pop() {
            Some(next) => next,
            // Absent at every level; the plain NotFound stands.
            None => return Err(err),
        };
        self.last_instance_name = next.instance_name().clone();
        let replacement = match &self.read {
            HierarchicalRead::Single => self.backend.get(&next).await,
            HierarchicalRead::Composite {
                child_digest,
                slicer,
            } => {
                let child = child_digest.with_instance_name(next.instance_name().clone());
                self.backend
                    .get_from_composite(&next, &child, slicer.clone())
                    .await
            }
        };
        Ok(replacement)
    }
}

///
/// Serves reads for an instance name out of the namespace itself or any of its parents. A
/// blob uploaded under the empty instance name is thereby visible to every tenant, while a
/// blob uploaded under `acme/dev` stays invisible to `acme/prod`.
///
/// Writes are not rerouted: they land exactly where the client addressed them.
///
pub struct HierarchicalInstanceNamesBlobAccess {
    backend: Arc<dyn BlobAccess>,
}

impl HierarchicalInstanceNamesBlobAccess {
    pub fn new(backend: Arc<dyn BlobAccess>) -> HierarchicalInstanceNamesBlobAccess {
        HierarchicalInstanceNamesBlobAccess { backend }
    }

    /// Splits the lookup sequence: the digest itself, then candidates in ascending-length
    /// order to be popped from the back (most specific parent first).
    fn lookup_plan(digest: &Digest) -> (Digest, Vec<Digest>) {
        let mut candidates = digest.get_digests_with_parent_instance_names();
        let first = candidates.pop().expect("prefixes always include the digest itself");
        (first, candidates)
    }
}

#[async_trait]
impl BlobAccess for HierarchicalInstanceNamesBlobAccess {
    async fn get(&self, digest: &Digest) -> Buffer {
        let (first, remaining) = Self::lookup_plan(digest);
        let buffer = self.backend.get(&first).await;
        buffer.with_error_handler(Box::new(HierarchicalErrorHandler {
            backend: self.backend.clone(),
            remaining,
            last_instance_name: first.instance_name().clone(),
            read: HierarchicalRead::Single,
        }))
    }

    async fn get_from_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let (first, remaining) = Self::lookup_plan(parent_digest);
        let buffer = self
            .backend
            .get_from_composite(&first, child_digest, slicer.clone())
            .await;
        buffer.with_error_handler(Box::new(HierarchicalErrorHandler {
            backend: self.backend.clone(),
            remaining,
            last_instance_name: first.instance_name().clone(),
            read: HierarchicalRead::Composite {
                child_digest: child_digest.clone(),
                slicer,
            },
        }))
    }

    async fn put(&self, digest: &Digest, buffer: Buffer) -> Result<(), Status> {
        self.backend.put(digest, buffer).await
    }

    async fn find_missing(&self, digests: DigestSet) -> Result<DigestSet, Status> {
        // Pass 1: the original instance names.
        let initially_missing = self.backend.find_missing(digests).await?;

        // Subsequent passes walk towards shorter instance names, one level per round trip,
        // deduplicating candidates that multiple originals share.
        struct Pending {
            original: Digest,
            // Parent digests in ascending length order; the next index to try.
            parents: Vec<Digest>,
            next: Option<usize>,
        }

        let mut pending: Vec<Pending> = initially_missing
            .into_iter()
            .map(|original| {
                let parents = original.get_digests_with_parent_instance_names();
                let next = parents.len().checked_sub(2);
                Pending {
                    original,
                    parents,
                    next,
                }
            })
            .collect();

        loop {
            let mut candidates = DigestSetBuilder::new();
            let mut waiting_on: HashMap<Digest, Vec<usize>> = HashMap::new();
            for (index, entry) in pending.iter().enumerate() {
                if let Some(next) = entry.next {
                    let candidate = entry.parents[next].clone();
                    candidates.add(candidate.clone());
                    waiting_on.entry(candidate).or_default().push(index);
                }
            }
            let candidates = candidates.build();
            if candidates.is_empty() {
                break;
            }
            let still_missing = self.backend.find_missing(candidates).await?;
            let mut found: Vec<usize> = Vec::new();
            for (candidate, indices) in waiting_on {
                if still_missing.contains(&candidate) {
                    for index in indices {
                        pending[index].next = pending[index].next.and_then(|n| n.checked_sub(1));
                    }
                } else {
                    found.extend(indices);
                }
            }
            found.sort_unstable_by(|a, b| b.cmp(a));
            for index in found {
                pending.swap_remove(index);
            }
        }

        let mut builder = DigestSetBuilder::new();
        for entry in pending {
            builder.add(entry.original);
        }
        Ok(builder.build())
    }

    async fn get_capabilities(
        &self,
        instance_name: &InstanceName,
    ) -> Result<ServerCapabilities, Status> {
        self.backend.get_capabilities(instance_name).await
    }
}
