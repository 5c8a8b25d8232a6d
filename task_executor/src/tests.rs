// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::Executor;

#[tokio::test]
async fn spawned_work_runs_to_completion() {
    let executor = Executor::new();
    let result = executor.spawn(async { 2 + 2 }, |e| panic!("join error: {e}")).await;
    assert_eq!(result, 4);
}

#[tokio::test]
async fn spawned_work_survives_dropped_handle() {
    let executor = Executor::new();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = executor.native_spawn(async move {
        let _ = tx.send(());
    });
    drop(handle);
    rx.await.expect("task should have run despite dropped handle");
}
