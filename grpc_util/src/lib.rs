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

use tonic::transport::Channel;
use tonic::Status;

pub mod prost;
pub mod retry;

///
/// Creates a lazily connecting channel for the given address. Connection establishment (and any
/// connection error) happens on first use, so constructing a backend never blocks on the peer.
///
pub fn create_channel(addr: &str) -> Result<Channel, Status> {
    let uri = tonic::transport::Uri::try_from(addr)
        .map_err(|err| Status::invalid_argument(format!("Invalid address {addr:?}: {err}")))?;
    Ok(Channel::builder(uri).connect_lazy())
}

pub fn status_to_str(status: Status) -> String {
    status_ref_to_str(&status)
}

pub fn status_ref_to_str(status: &Status) -> String {
    format!("{:?}: {:?}", status.code(), status.message())
}

///
/// Prepends a tier name to a Status message, leaving the code untouched. Used where two backends
/// can fail with otherwise indistinguishable errors.
///
pub fn prefix_status(prefix: &str, status: Status) -> Status {
    Status::new(status.code(), format!("{}: {}", prefix, status.message()))
}

#[cfg(test)]
mod tests {
    use tonic::{Code, Status};

    use crate::prefix_status;

    #[test]
    fn prefix_status_keeps_the_code() {
        let status = prefix_status("Primary", Status::not_found("Blob does not exist"));
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "Primary: Blob does not exist");
    }
}
