// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::Executor;
use std::time::Duration;

#[tokio::test]
async fn spawn_runs_future() {
    let executor = Executor::new();
    let result = executor.spawn(async { 42 }, |_| 0).await;
    assert_eq!(result, 42);
}

#[test]
fn owned_executor_shuts_down() {
    let executor = Executor::new_owned(1, 2).unwrap();
    assert!(!executor.is_shutdown());
    executor.block_on(async {
        tokio::time::sleep(Duration::from_millis(1)).await;
    });
    executor.shutdown(Duration::from_secs(1));
    assert!(executor.is_shutdown());
}

#[test]
fn borrowed_executor_is_always_shutdown() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let executor = Executor::new();
    let borrowed = executor.to_borrowed();
    assert!(borrowed.is_shutdown());
}
