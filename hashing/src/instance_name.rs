// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fmt;

use tonic::Status;

/// Path components that have a protocol meaning and may therefore never appear inside an
/// instance name. `uploads` anchoring is what makes write resource names parseable.
const RESERVED_COMPONENTS: [&str; 7] = [
    "blobs",
    "uploads",
    "actions",
    "actionResults",
    "operations",
    "capabilities",
    "compressed-blobs",
];

///
/// A validated tenant/namespace prefix, as used in remote execution resource names. The empty
/// instance name is the root namespace.
///
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct InstanceName(String);

impl InstanceName {
    pub fn empty() -> InstanceName {
        InstanceName(String::new())
    }

    pub fn new(value: impl Into<String>) -> Result<InstanceName, Status> {
        let value = value.into();
        if value.is_empty() {
            return Ok(InstanceName(value));
        }
        for component in value.split('/') {
            if component.is_empty() {
                return Err(Status::invalid_argument(format!(
                    "Instance name {value:?} contains redundant slashes"
                )));
            }
            if RESERVED_COMPONENTS.contains(&component) {
                return Err(Status::invalid_argument(format!(
                    "Instance name {value:?} contains reserved keyword {component:?}"
                )));
            }
        }
        Ok(InstanceName(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The `/`-separated components of this instance name, of which the empty instance name
    /// has none.
    pub fn components(&self) -> Vec<&str> {
        if self.0.is_empty() {
            Vec::new()
        } else {
            self.0.split('/').collect()
        }
    }

    ///
    /// Every instance name that is a (`/`-separated) prefix of this one, ordered ascending by
    /// length: the empty instance name first, this instance name last.
    ///
    pub fn prefixes(&self) -> Vec<InstanceName> {
        let mut out = vec![InstanceName::empty()];
        let mut prefix = String::new();
        for component in self.components() {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(component);
            out.push(InstanceName(prefix.clone()));
        }
        out
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
