// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Leaf backends that forward every operation to a peer speaking the remote execution
//! protocol, turning this process into a proxy, cache tier or replication source for it.

mod action_cache;
pub use action_cache::ActionCacheGrpcBlobAccess;

mod cas;
pub use cas::CasGrpcBlobAccess;
