// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use bytes::Bytes;
use hashing::{Digest, DigestFunction, Function, InstanceName};
use prost::Message;
use protos::gen::build::bazel::remote::execution::v2 as remexec;

pub fn sha256_function(instance_name: &str) -> Function {
    Function::new(
        InstanceName::new(instance_name).unwrap(),
        DigestFunction::Sha256,
    )
}

/// A blob with known contents, to be stored and fetched in tests.
#[derive(Clone)]
pub struct TestData {
    bytes: Bytes,
}

impl TestData {
    pub fn new(content: &str) -> TestData {
        TestData {
            bytes: Bytes::copy_from_slice(content.as_bytes()),
        }
    }

    pub fn hello() -> TestData {
        TestData::new("Hello, world")
    }

    pub fn catnip() -> TestData {
        TestData::new("catnip")
    }

    /// Larger than any reasonable batch or chunk size used in tests.
    pub fn forty_kilobytes() -> TestData {
        TestData {
            bytes: Bytes::from(vec![0x2a; 40 * 1024]),
        }
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn digest(&self, function: &Function) -> Digest {
        let mut generator = function.new_generator();
        generator.update(&self.bytes);
        generator.finish()
    }
}

/// A Directory message with knowable digests, for exercising tree traversal.
#[derive(Clone)]
pub struct TestDirectory {
    directory: remexec::Directory,
}

impl TestDirectory {
    pub fn empty() -> TestDirectory {
        TestDirectory {
            directory: remexec::Directory::default(),
        }
    }

    pub fn containing(files: &[(&str, &TestData)], function: &Function) -> TestDirectory {
        let mut directory = remexec::Directory::default();
        for (name, data) in files {
            directory.files.push(remexec::FileNode {
                name: (*name).to_owned(),
                digest: Some((&data.digest(function)).into()),
                is_executable: false,
            });
        }
        TestDirectory { directory }
    }

    pub fn with_child(mut self, name: &str, child: &TestDirectory, function: &Function) -> Self {
        self.directory.directories.push(remexec::DirectoryNode {
            name: name.to_owned(),
            digest: Some((&child.digest(function)).into()),
        });
        self
    }

    pub fn directory(&self) -> remexec::Directory {
        self.directory.clone()
    }

    pub fn bytes(&self) -> Bytes {
        Bytes::from(self.directory.encode_to_vec())
    }

    pub fn digest(&self, function: &Function) -> Digest {
        let mut generator = function.new_generator();
        generator.update(&self.bytes());
        generator.finish()
    }
}

/// A Tree message bundling a root directory and its children.
#[derive(Clone)]
pub struct TestTree {
    tree: remexec::Tree,
}

impl TestTree {
    pub fn new(root: &TestDirectory, children: &[&TestDirectory]) -> TestTree {
        TestTree {
            tree: remexec::Tree {
                root: Some(root.directory()),
                children: children.iter().map(|c| c.directory()).collect(),
            },
        }
    }

    pub fn tree(&self) -> remexec::Tree {
        self.tree.clone()
    }

    pub fn bytes(&self) -> Bytes {
        Bytes::from(self.tree.encode_to_vec())
    }

    pub fn digest(&self, function: &Function) -> Digest {
        let mut generator = function.new_generator();
        generator.update(&self.bytes());
        generator.finish()
    }
}

/// An ActionResult referencing the given outputs, for completeness checking tests.
pub fn action_result_with_outputs(
    files: &[&TestData],
    trees: &[&TestTree],
    function: &Function,
) -> remexec::ActionResult {
    let mut action_result = remexec::ActionResult::default();
    for (index, data) in files.iter().enumerate() {
        action_result.output_files.push(remexec::OutputFile {
            path: format!("out/file{index}"),
            digest: Some((&data.digest(function)).into()),
            is_executable: false,
            contents: Bytes::new(),
        });
    }
    for (index, tree) in trees.iter().enumerate() {
        action_result
            .output_directories
            .push(remexec::OutputDirectory {
                path: format!("out/dir{index}"),
                tree_digest: Some((&tree.digest(function)).into()),
                is_topologically_sorted: false,
                root_directory_digest: None,
            });
    }
    action_result
}
