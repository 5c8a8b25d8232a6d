// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use buffer::Buffer;
use hashing::{Digest, DigestSet};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tonic::Status;

use crate::replication::BlobReplicator;
use crate::BlobSlicer;

const OK: &str = "ok";
const ERROR: &str = "error";

struct Recorded {
    duration_microseconds: HashMap<(&'static str, &'static str), Histogram<u64>>,
    blob_size_bytes: Histogram<u64>,
    batch_size: Histogram<u64>,
}

impl Recorded {
    fn new() -> Recorded {
        Recorded {
            duration_microseconds: HashMap::new(),
            blob_size_bytes: Histogram::new(3).expect("3 significant figures is always valid"),
            batch_size: Histogram::new(3).expect("3 significant figures is always valid"),
        }
    }

    fn record_duration(&mut self, operation: &'static str, outcome: &'static str, started: Instant) {
        let histogram = self
            .duration_microseconds
            .entry((operation, outcome))
            .or_insert_with(|| Histogram::new(3).expect("3 significant figures is always valid"));
        let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        histogram.saturating_record(micros);
    }
}

///
/// Wraps any replicator with duration, blob size and batch size histograms, keyed by
/// operation and outcome. The histograms live in memory; exporting them is left to whatever
/// metrics plumbing a deployment wires up.
///
pub struct MetricsBlobReplicator {
    base: Arc<dyn BlobReplicator>,
    recorded: Mutex<Recorded>,
}

impl MetricsBlobReplicator {
    pub fn new(base: Arc<dyn BlobReplicator>) -> MetricsBlobReplicator {
        MetricsBlobReplicator {
            base,
            recorded: Mutex::new(Recorded::new()),
        }
    }

    /// The number of durations recorded for an operation and outcome. Mostly of interest to
    /// exporters and tests.
    pub fn recorded_count(&self, operation: &'static str, outcome: &'static str) -> u64 {
        self.recorded
            .lock()
            .duration_microseconds
            .get(&(operation, outcome))
            .map(|h| h.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl BlobReplicator for MetricsBlobReplicator {
    async fn replicate_single(&self, digest: &Digest) -> Buffer {
        let started = Instant::now();
        let buffer = self.base.replicate_single(digest).await;
        let mut recorded = self.recorded.lock();
        recorded.blob_size_bytes.saturating_record(digest.size_bytes());
        recorded.record_duration("replicate_single", OK, started);
        buffer
    }

    async fn replicate_composite(
        &self,
        parent_digest: &Digest,
        child_digest: &Digest,
        slicer: Arc<dyn BlobSlicer>,
    ) -> Buffer {
        let started = Instant::now();
        let buffer = self
            .base
            .replicate_composite(parent_digest, child_digest, slicer)
            .await;
        let mut recorded = self.recorded.lock();
        recorded
            .blob_size_bytes
            .saturating_record(parent_digest.size_bytes());
        recorded.record_duration("replicate_composite", OK, started);
        buffer
    }

    async fn replicate_multiple(&self, digests: DigestSet) -> Result<(), Status> {
        let started = Instant::now();
        let batch_size = digests.len() as u64;
        let result = self.base.replicate_multiple(digests).await;
        let outcome = if result.is_ok() { OK } else { ERROR };
        let mut recorded = self.recorded.lock();
        recorded.batch_size.saturating_record(batch_size);
        recorded.record_duration("replicate_multiple", outcome, started);
        result
    }
}
