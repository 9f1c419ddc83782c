// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! End-to-end scenarios (§8) driven against an in-process mock Engine: a PCore, one
//! or more registered Engines, and a loop that calls `tick()` the way `parrot`'s own
//! main loop does, with no HTTP layer in between.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::Config;
use dispatcher::EngineConfig;
use engine_client::{EngineClient, EngineClientError, PingResponse, RuntimeInfo};
use graph::SamplingConfig;
use parking_lot::Mutex;
use pcore::call::{Call, InputBinding};
use pcore::{Error, InternalError, PCore, UserError};
use task_executor::Executor;

/// Concatenates whatever text it was `fill`ed with, wrapped in brackets, so a test can
/// assert on generated content without caring about a real model's output. `fail_addrs`
/// simulates an engine that is unreachable: every `fill`/`generate` against it returns
/// a retryable error, modeling "engine loss mid-flight" (§8).
struct MockEngine {
    contexts: Mutex<HashMap<u64, Vec<String>>>,
    fail_addrs: Mutex<HashSet<String>>,
}

impl MockEngine {
    fn new() -> Arc<MockEngine> {
        Arc::new(MockEngine { contexts: Mutex::new(HashMap::new()), fail_addrs: Mutex::new(HashSet::new()) })
    }

    fn kill(&self, addr: &str) {
        self.fail_addrs.lock().insert(addr.to_owned());
    }
}

#[async_trait]
impl EngineClient for MockEngine {
    async fn ping(&self, addr: &str) -> Result<PingResponse, EngineClientError> {
        if self.fail_addrs.lock().contains(addr) {
            return Err(EngineClientError::Retryable("engine unreachable".to_owned()));
        }
        Ok(PingResponse { pong: true, runtime_info: RuntimeInfo { pending_jobs: 0, free_capacity: 1 } })
    }

    async fn fill(&self, addr: &str, context_id: u64, tokens: &[String]) -> Result<(), EngineClientError> {
        if self.fail_addrs.lock().contains(addr) {
            return Err(EngineClientError::Retryable("engine unreachable".to_owned()));
        }
        self.contexts.lock().entry(context_id).or_default().extend(tokens.iter().cloned());
        Ok(())
    }

    async fn generate(&self, addr: &str, context_id: u64, _sampling_config: &SamplingConfig) -> Result<String, EngineClientError> {
        if self.fail_addrs.lock().contains(addr) {
            return Err(EngineClientError::Retryable("engine unreachable".to_owned()));
        }
        let joined = self.contexts.lock().get(&context_id).cloned().unwrap_or_default().join("");
        Ok(format!("[{joined}]"))
    }

    async fn free_context(&self, _addr: &str, context_id: u64) -> Result<(), EngineClientError> {
        self.contexts.lock().remove(&context_id);
        Ok(())
    }
}

/// Drives `core.tick()` every 5ms in the background, the way `PCore::run` does for
/// the real `parrot` binary, for the lifetime of the test.
fn drive(core: Arc<PCore>, executor: &Executor) {
    executor.native_spawn(async move {
        loop {
            core.tick().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });
}

async fn fetch(core: &PCore, pid: process::Pid, id: svar::SvId) -> Result<String, Error> {
    tokio::time::timeout(Duration::from_secs(5), core.placeholder_fetch(pid, id))
        .await
        .expect("scenario did not resolve within the test timeout")
}

fn call(body: &str, inputs: &[(&str, InputBinding)], outputs: &[&str]) -> Call {
    Call {
        body: body.to_owned(),
        inputs: inputs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        outputs: outputs.iter().map(|k| (k.to_string(), SamplingConfig::default())).collect(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn a_single_constant_prefix_resolves_its_output() {
    let executor = Executor::new();
    let engine = MockEngine::new();
    let core = Arc::new(PCore::new(&Config::default(), engine, executor.to_borrowed()));
    drive(core.clone(), &executor);

    core.register_engine("http://engine-a", EngineConfig::default()).unwrap();
    let pid = core.register_vm().unwrap();

    let outputs = core.submit_semantic_call(pid, call("Hello, ", &[], &["greeting"])).unwrap();
    let id = outputs["greeting"];

    assert_eq!(fetch(&core, pid, id).await.unwrap(), "[Hello, ]");
}

#[tokio::test(flavor = "multi_thread")]
async fn chained_calls_feed_one_call_s_output_into_the_next() {
    let executor = Executor::new();
    let engine = MockEngine::new();
    let core = Arc::new(PCore::new(&Config::default(), engine, executor.to_borrowed()));
    drive(core.clone(), &executor);

    core.register_engine("http://engine-a", EngineConfig::default()).unwrap();
    let pid = core.register_vm().unwrap();

    let first = core.submit_semantic_call(pid, call("a", &[], &["x"])).unwrap();
    let x_id = first["x"];

    let second = core
        .submit_semantic_call(pid, call("{{x}}b", &[("x", InputBinding::Var(x_id.0))], &["y"]))
        .unwrap();
    let y_id = second["y"];

    assert_eq!(fetch(&core, pid, x_id).await.unwrap(), "[a]");
    assert_eq!(fetch(&core, pid, y_id).await.unwrap(), "[[a]b]");
}

#[tokio::test(flavor = "multi_thread")]
async fn losing_an_engine_mid_flight_requeues_onto_a_surviving_one() {
    let executor = Executor::new();
    let engine = MockEngine::new();
    let core = Arc::new(PCore::new(&Config::default(), engine.clone(), executor.to_borrowed()));
    drive(core.clone(), &executor);

    core.register_engine("http://doomed", EngineConfig::default()).unwrap();
    core.register_engine("http://survivor", EngineConfig::default()).unwrap();
    // "doomed" never has a chance to serve anything successfully; regardless of which
    // engine dispatch() initially picks, the thread must eventually land on
    // "survivor" and complete.
    engine.kill("http://doomed");

    let pid = core.register_vm().unwrap();
    let outputs = core.submit_semantic_call(pid, call("go", &[], &["out"])).unwrap();

    assert_eq!(fetch(&core, pid, outputs["out"]).await.unwrap(), "[go]");
}

#[tokio::test(flavor = "multi_thread")]
async fn adjacent_outputs_with_no_anchor_text_are_rejected_before_touching_the_graph() {
    let executor = Executor::new();
    let engine = MockEngine::new();
    let core = PCore::new(&Config::default(), engine, executor.to_borrowed());

    let pid = core.register_vm().unwrap();
    let err = core.submit_semantic_call(pid, call("{{a}}{{b}}", &[], &["a", "b"])).unwrap_err();
    assert!(matches!(err, Error::User(UserError::OutputAdjacency(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn an_unknown_placeholder_id_is_reported_as_such() {
    let executor = Executor::new();
    let engine = MockEngine::new();
    let core = PCore::new(&Config::default(), engine, executor.to_borrowed());

    let pid = core.register_vm().unwrap();
    let err = core.placeholder_fetch(pid, svar::SvId(12345)).await.unwrap_err();
    assert!(matches!(err, Error::User(UserError::UnknownVariable(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_call_with_no_engine_ever_able_to_serve_it_is_declared_deadlocked() {
    let executor = Executor::new();
    let engine = MockEngine::new();
    let core = Arc::new(PCore::new(&Config::default(), engine, executor.to_borrowed()));
    drive(core.clone(), &executor);

    // No engine is ever registered, so this thread sits QUEUED forever: nothing will
    // ever dispatch() it, and nothing upstream of it will ever produce a value either.
    let pid = core.register_vm().unwrap();
    let outputs = core.submit_semantic_call(pid, call("go", &[], &["out"])).unwrap();

    let err = fetch(&core, pid, outputs["out"]).await.unwrap_err();
    assert_eq!(err, Error::Internal(InternalError::Deadlock));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_vm_that_stops_heartbeating_is_reclaimed_after_its_expiry_deadline() {
    let executor = Executor::new();
    let engine = MockEngine::new();
    let core = Arc::new(PCore::new(&Config::default(), engine, executor.to_borrowed()));
    drive(core.clone(), &executor);

    let pid = core.register_vm().unwrap();

    // Config::default()'s VM_EXPIRE_TIME is 7s; with no further heartbeat, tick()'s
    // own check_expired_processes (not a per-process background poller) observes the
    // missed deadline on its next round.
    tokio::time::sleep(Duration::from_secs(8)).await;

    let err = core.vm_heartbeat(pid).unwrap_err();
    assert!(matches!(err, Error::User(UserError::DeadProcess(p)) if p == pid));

    // sweep_dead_processes frees the reclaimed VM's pid back to the pool.
    let reused = core.register_vm().unwrap();
    assert_eq!(reused, pid);
}
