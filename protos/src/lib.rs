// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(unused_must_use)]
// See https://github.com/hyperium/tonic/issues/1056
#![allow(clippy::derive_partial_eq_without_eq)]

mod conversions;
pub use conversions::{
    digest_function_from_wire, digest_function_to_wire, require_digest, require_digest_function,
};

#[cfg(test)]
mod conversions_tests;

pub mod gen {
    // NOTE: Prost automatically relies on the existence of this nested module structure because
    // it uses multiple `super` references (e.g., `super::super::super::Foo`) to traverse out of
    // a module to refer to protos in other modules.
    pub mod google {
        pub mod bytestream {
            tonic::include_proto!("google.bytestream");
        }
        pub mod rpc {
            tonic::include_proto!("google.rpc");
        }
    }
    pub mod build {
        pub mod bazel {
            pub mod remote {
                pub mod execution {
                    pub mod v2 {
                        tonic::include_proto!("build.bazel.remote.execution.v2");
                    }
                }
            }
            pub mod semver {
                tonic::include_proto!("build.bazel.semver");
            }
        }
    }
    pub mod blobgrid {
        pub mod replicator {
            tonic::include_proto!("blobgrid.replicator");
        }
    }
}
