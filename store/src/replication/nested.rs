// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use hashing::{Digest, DigestSetBuilder, Function, KeyFormat};
use parking_lot::Mutex;
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use protos::require_digest;
use tokio::sync::Notify;
use tonic::Status;

use crate::replication::BlobReplicator;

#[derive(Clone, Copy, Debug)]
enum NestedKind {
    Action,
    Directory,
    Tree,
}

struct NestedState {
    queue: VecDeque<(NestedKind, Digest)>,
    seen: HashSet<String>,
    active_expansions: usize,
}

///
/// Replicates the full closure of REv2 structures: an Action references a Command and an
/// input root Directory, Directories reference files and further Directories, Trees contain
/// their whole closure inline. Containers are expanded exactly once (tracked in a seen set
/// keyed by the configured key format); leaf blobs are replicated in batches.
///
/// Work is enqueued with the `enqueue_*` methods; `replicate` drains the queue and may be
/// called from any number of tasks concurrently, each of which returns once the queue is
/// empty and no expansion is in flight.
///
pub struct NestedBlobReplicator {
    base: Arc<dyn BlobReplicator>,
    key_format: KeyFormat,
    maximum_message_size_bytes: usize,
    state: Mutex<NestedState>,
    wakeup: Notify,
}

struct ExpansionGuard<'a> {
    replicator: &'a NestedBlobReplicator,
}

impl Drop for ExpansionGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.replicator.state.lock();
            state.active_expansions -= 1;
        }
        // Wake waiters: either the expansion enqueued new work, or the system quiesced.
        self.replicator.wakeup.notify_waiters();
    }
}

impl NestedBlobReplicator {
    pub fn new(
        base: Arc<dyn BlobReplicator>,
        key_format: KeyFormat,
        maximum_message_size_bytes: usize,
    ) -> NestedBlobReplicator {
        NestedBlobReplicator {
            base,
            key_format,
            maximum_message_size_bytes,
            state: Mutex::new(NestedState {
                queue: VecDeque::new(),
                seen: HashSet::new(),
                active_expansions: 0,
            }),
            wakeup: Notify::new(),
        }
    }

    pub fn enqueue_action(&self, digest: Digest) {
        self.enqueue(NestedKind::Action, digest)
    }

    pub fn enqueue_directory(&self, digest: Digest) {
        self.enqueue(NestedKind::Directory, digest)
    }

    pub fn enqueue_tree(&self, digest: Digest) {
        self.enqueue(NestedKind::Tree, digest)
    }

    fn enqueue(&self, kind: NestedKind, digest: Digest) {
        let newly_seen = {
            let mut state = self.state.lock();
            if state.seen.insert(digest.get_key(self.key_format)) {
                state.queue.push_back((kind, digest));
                true
            } else {
                false
            }
        };
        if newly_seen {
            self.wakeup.notify_waiters();
        }
    }

    ///
    /// Drains the queue. Returns once the queue is empty and no expansion is in progress
    /// anywhere, or as soon as an expansion performed by this caller fails.
    ///
    pub async fn replicate(&self) -> Result<(), Status> {
        loop {
            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let work = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(work) => {
                        state.active_expansions += 1;
                        Some(work)
                    }
                    None if state.active_expansions == 0 => return Ok(()),
                    None => None,
                }
            };
            match work {
                Some((kind, digest)) => {
                    let guard = ExpansionGuard { replicator: self };
                    let result = self.expand(kind, &digest).await;
                    drop(guard);
                    result?;
                }
                // Another task is still expanding; it may enqueue more work or quiesce.
                None => notified.await,
            }
        }
    }

    async fn expand(&self, kind: NestedKind, digest: &Digest) -> Result<(), Status> {
        let buffer = self.base.replicate_single(digest).await;
        let function = digest.function();
        let mut leaves = DigestSetBuilder::new();
        match kind {
            NestedKind::Action => {
                let action: remexec::Action =
                    buffer.to_proto(self.maximum_message_size_bytes).await?;
                let command_digest = require_digest(&function, action.command_digest.as_ref())?;
                self.collect_leaf(command_digest, &mut leaves);
                if action.input_root_digest.is_some() {
                    self.enqueue_directory(require_digest(
                        &function,
                        action.input_root_digest.as_ref(),
                    )?);
                }
            }
            NestedKind::Directory => {
                let directory: remexec::Directory =
                    buffer.to_proto(self.maximum_message_size_bytes).await?;
                self.collect_directory_leaves(&function, &directory, &mut leaves)?;
                for node in &directory.directories {
                    self.enqueue_directory(require_digest(&function, node.digest.as_ref())?);
                }
            }
            NestedKind::Tree => {
                let tree: remexec::Tree = buffer.to_proto(self.maximum_message_size_bytes).await?;
                for directory in tree.root.iter().chain(tree.children.iter()) {
                    self.collect_directory_leaves(&function, directory, &mut leaves)?;
                }
            }
        }
        let leaves = leaves.build();
        if leaves.is_empty() {
            Ok(())
        } else {
            self.base.replicate_multiple(leaves).await
        }
    }

    fn collect_directory_leaves(
        &self,
        function: &Function,
        directory: &remexec::Directory,
        leaves: &mut DigestSetBuilder,
    ) -> Result<(), Status> {
        for file in &directory.files {
            let file_digest = require_digest(function, file.digest.as_ref())?;
            self.collect_leaf(file_digest, leaves);
        }
        Ok(())
    }

    fn collect_leaf(&self, digest: Digest, leaves: &mut DigestSetBuilder) {
        let mut state = self.state.lock();
        if state.seen.insert(digest.get_key(self.key_format)) {
            leaves.add(digest);
        }
    }
}
