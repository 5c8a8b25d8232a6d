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

//! Thin server shells that translate remote execution protocol calls into BlobAccess
//! operations. Everything of substance happens in the backend chain behind them.

mod action_cache_service;
pub use crate::action_cache_service::ActionCacheService;

mod byte_stream_service;
pub use crate::byte_stream_service::ByteStreamService;

mod capabilities_service;
pub use crate::capabilities_service::CapabilitiesService;

mod cas_service;
pub use crate::cas_service::CasService;

mod replicator_service;
pub use crate::replicator_service::ReplicatorService;


use hashing::Compressor;
use tonic::Status;

/// Compressed resource names parse fine, but only the identity encoding is actually served;
/// compressed transfer belongs to the transport wiring around this crate.
fn require_identity_compressor(compressor: Compressor) -> Result<(), Status> {
    if compressor == Compressor::Identity {
        Ok(())
    } else {
        Err(Status::invalid_argument(format!(
            "The {} compressor is not supported",
            compressor.name()
        )))
    }
}
