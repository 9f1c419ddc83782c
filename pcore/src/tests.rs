// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use config::Config;
use engine_client::{EngineClient, EngineClientError, PingResponse};
use graph::SamplingConfig;
use task_executor::Executor;

use crate::call::{Call, InputBinding};
use crate::{Error, PCore, UserError};

/// No test in this file registers an engine, so every method here is unreachable.
struct NeverClient;

#[async_trait]
impl EngineClient for NeverClient {
    async fn ping(&self, _addr: &str) -> Result<PingResponse, EngineClientError> {
        unreachable!("no engine is registered in these tests")
    }

    async fn fill(&self, _addr: &str, _context_id: u64, _tokens: &[String]) -> Result<(), EngineClientError> {
        unreachable!("no engine is registered in these tests")
    }

    async fn generate(
        &self,
        _addr: &str,
        _context_id: u64,
        _sampling_config: &SamplingConfig,
    ) -> Result<String, EngineClientError> {
        unreachable!("no engine is registered in these tests")
    }

    async fn free_context(&self, _addr: &str, _context_id: u64) -> Result<(), EngineClientError> {
        unreachable!("no engine is registered in these tests")
    }
}

fn pcore(executor: &Executor) -> PCore {
    PCore::new(&Config::default(), Arc::new(NeverClient), executor.to_borrowed())
}

#[tokio::test]
async fn register_vm_allocates_distinct_pids() {
    let executor = Executor::new();
    let core = pcore(&executor);
    let a = core.register_vm().unwrap();
    let b = core.register_vm().unwrap();
    assert_ne!(a, b);
}

#[tokio::test]
async fn unknown_pid_operations_fail_with_unknown_pid() {
    let executor = Executor::new();
    let core = pcore(&executor);
    let err = core.vm_heartbeat(999).unwrap_err();
    assert_eq!(err, Error::User(UserError::UnknownPid(999)));
}

#[tokio::test]
async fn vm_heartbeat_reports_zero_threads_for_a_freshly_registered_vm() {
    let executor = Executor::new();
    let core = pcore(&executor);
    let pid = core.register_vm().unwrap();
    let info = core.vm_heartbeat(pid).unwrap();
    assert_eq!(info.thread_count, 0);
}

#[tokio::test]
async fn submit_semantic_call_rejects_an_unbound_placeholder() {
    let executor = Executor::new();
    let core = pcore(&executor);
    let pid = core.register_vm().unwrap();

    let call = Call { body: "{{mystery}}".to_owned(), inputs: HashMap::new(), outputs: HashMap::new() };
    let err = core.submit_semantic_call(pid, call).unwrap_err();
    assert!(matches!(err, Error::User(UserError::ParseFailed(_))));
}

#[tokio::test]
async fn a_pure_constant_call_resolves_without_any_engine() {
    let executor = Executor::new();
    let core = pcore(&executor);
    let pid = core.register_vm().unwrap();

    let mut inputs = HashMap::new();
    inputs.insert("name".to_owned(), InputBinding::Const("world".to_owned()));
    let call = Call { body: "hello {{name}}".to_owned(), inputs, outputs: HashMap::new() };

    // A call with no Output placeholder never touches the Dispatcher or an Engine;
    // it only proves rewriting a pure Fill chain succeeds.
    core.submit_semantic_call(pid, call).unwrap();
}

#[tokio::test]
async fn placeholder_set_on_an_unknown_variable_fails() {
    let executor = Executor::new();
    let core = pcore(&executor);
    let pid = core.register_vm().unwrap();

    let err = core.placeholder_set(pid, svar::SvId(999), "x").unwrap_err();
    assert!(matches!(err, Error::User(UserError::UnknownVariable(_))));
}
