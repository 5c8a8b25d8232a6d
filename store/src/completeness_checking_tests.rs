// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::sync::atomic::Ordering;
use std::sync::Arc;

use buffer::Buffer;
use hashing::KeyFormat;
use protos::gen::build::bazel::remote::execution::v2 as remexec;
use testutil::data::{action_result_with_outputs, sha256_function, TestData, TestDirectory, TestTree};
use tonic::Code;

use crate::testing::{put_bytes, CountingBlobAccess, MAX_SIZE};
use crate::{BlobAccess, BlobAccessKind, CompletenessCheckingBlobAccess, MemoryBlobAccess};

const BATCH_SIZE: usize = 2;

struct Fixture {
    action_cache: Arc<MemoryBlobAccess>,
    counting_cas: Arc<CountingBlobAccess>,
    files: Vec<TestData>,
    tree: TestTree,
    action_digest: hashing::Digest,
}

impl Fixture {
    /// An action result referencing two output files and a tree with two nested files, all
    /// of which are stored in the CAS.
    async fn new() -> Fixture {
        let function = sha256_function("");
        let action_cache = Arc::new(MemoryBlobAccess::new(
            BlobAccessKind::ActionCache,
            KeyFormat::WithInstance,
        ));
        let cas = Arc::new(MemoryBlobAccess::new(
            BlobAccessKind::Cas,
            KeyFormat::WithInstance,
        ));

        let files = vec![TestData::new("output one"), TestData::new("output two")];
        let nested = vec![TestData::new("nested one"), TestData::new("nested two")];
        let directory = TestDirectory::containing(
            &[("n1", &nested[0]), ("n2", &nested[1])],
            &function,
        );
        let tree = TestTree::new(&directory, &[]);

        for data in files.iter().chain(nested.iter()) {
            put_bytes(cas.as_ref(), &data.digest(&function), data.bytes()).await;
        }
        put_bytes(cas.as_ref(), &tree.digest(&function), tree.bytes()).await;

        let action_result =
            action_result_with_outputs(&[&files[0], &files[1]], &[&tree], &function);
        let action_digest = TestData::new("the action").digest(&function);
        action_cache
            .put(&action_digest, Buffer::from_proto(&action_result))
            .await
            .unwrap();

        let counting_cas = Arc::new(CountingBlobAccess::new(cas));
        Fixture {
            action_cache,
            counting_cas,
            files,
            tree,
            action_digest,
        }
    }

    fn checking(&self) -> CompletenessCheckingBlobAccess {
        CompletenessCheckingBlobAccess::new(
            self.action_cache.clone(),
            self.counting_cas.clone(),
            BATCH_SIZE,
            MAX_SIZE,
            1024 * 1024,
        )
    }
}

#[tokio::test]
async fn complete_action_results_are_served() {
    let fixture = Fixture::new().await;
    let checking = fixture.checking();
    let action_result: remexec::ActionResult = checking
        .get(&fixture.action_digest)
        .await
        .to_proto(MAX_SIZE)
        .await
        .unwrap();
    assert_eq!(action_result.output_files.len(), 2);

    // Five referenced digests (two files, the tree, two nested files), checked in batches.
    let expected_calls = 5usize.div_ceil(BATCH_SIZE);
    assert_eq!(
        fixture.counting_cas.find_missing_calls.load(Ordering::SeqCst),
        expected_calls
    );
}

#[tokio::test]
async fn a_missing_output_file_fails_the_lookup() {
    let fixture = Fixture::new().await;
    let function = sha256_function("");
    let missing_digest = fixture.files[0].digest(&function);

    // A CAS that has everything except the first output file.
    let incomplete_cas = Arc::new(MemoryBlobAccess::new(
        BlobAccessKind::Cas,
        KeyFormat::WithInstance,
    ));
    put_bytes(
        incomplete_cas.as_ref(),
        &fixture.files[1].digest(&function),
        fixture.files[1].bytes(),
    )
    .await;
    put_bytes(
        incomplete_cas.as_ref(),
        &fixture.tree.digest(&function),
        fixture.tree.bytes(),
    )
    .await;

    let checking = CompletenessCheckingBlobAccess::new(
        fixture.action_cache.clone(),
        incomplete_cas,
        BATCH_SIZE,
        MAX_SIZE,
        1024 * 1024,
    );
    let err = checking
        .get(&fixture.action_digest)
        .await
        .to_byte_slice(MAX_SIZE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(
        err.message().contains(&missing_digest.hash().to_hex()),
        "{}",
        err.message()
    );
}

#[tokio::test]
async fn a_malformed_digest_in_the_result_is_not_found() {
    let function = sha256_function("");
    let action_cache = Arc::new(MemoryBlobAccess::new(
        BlobAccessKind::ActionCache,
        KeyFormat::WithInstance,
    ));
    let cas = Arc::new(MemoryBlobAccess::new(
        BlobAccessKind::Cas,
        KeyFormat::WithInstance,
    ));
    let mut action_result = remexec::ActionResult::default();
    action_result.output_files.push(remexec::OutputFile {
        path: "out/file".to_owned(),
        digest: Some(remexec::Digest {
            hash: "not-a-hash".to_owned(),
            size_bytes: 5,
        }),
        is_executable: false,
        contents: bytes::Bytes::new(),
    });
    let action_digest = TestData::new("the action").digest(&function);
    action_cache
        .put(&action_digest, Buffer::from_proto(&action_result))
        .await
        .unwrap();

    let checking =
        CompletenessCheckingBlobAccess::new(action_cache, cas, BATCH_SIZE, MAX_SIZE, 1024);
    let err = checking
        .get(&action_digest)
        .await
        .to_byte_slice(MAX_SIZE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn oversized_trees_are_not_parsed() {
    let fixture = Fixture::new().await;
    let checking = CompletenessCheckingBlobAccess::new(
        fixture.action_cache.clone(),
        fixture.counting_cas.clone(),
        BATCH_SIZE,
        MAX_SIZE,
        // A combined tree budget smaller than the tree itself.
        1,
    );
    let err = checking
        .get(&fixture.action_digest)
        .await
        .to_byte_slice(MAX_SIZE)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(
        err.message().contains("Combined size"),
        "{}",
        err.message()
    );
}
