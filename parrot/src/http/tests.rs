// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use config::Config;
use engine_client::{EngineClient, EngineClientError, PingResponse};
use graph::SamplingConfig;
use serde_json::{json, Value};
use task_executor::Executor;

use super::router;

struct NeverClient;

#[async_trait]
impl EngineClient for NeverClient {
    async fn ping(&self, _addr: &str) -> Result<PingResponse, EngineClientError> {
        unreachable!("these tests never register an engine")
    }

    async fn fill(&self, _addr: &str, _context_id: u64, _tokens: &[String]) -> Result<(), EngineClientError> {
        unreachable!("these tests never register an engine")
    }

    async fn generate(
        &self,
        _addr: &str,
        _context_id: u64,
        _sampling_config: &SamplingConfig,
    ) -> Result<String, EngineClientError> {
        unreachable!("these tests never register an engine")
    }

    async fn free_context(&self, _addr: &str, _context_id: u64) -> Result<(), EngineClientError> {
        unreachable!("these tests never register an engine")
    }
}

/// Binds the router to an ephemeral local port and returns its base URL, the same
/// listener-then-`axum_server`-then-`reqwest` shape the teacher uses for its own
/// `downloads` handler tests.
async fn spawn_server() -> String {
    let executor = Executor::new();
    let core = Arc::new(pcore::PCore::new(&Config::default(), Arc::new(NeverClient), executor.to_borrowed()));

    let bind_addr = "127.0.0.1:0".parse::<SocketAddr>().unwrap();
    let listener = std::net::TcpListener::bind(bind_addr).unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let app = router(core);
    tokio::spawn(async move {
        axum_server::from_tcp(listener)
            .expect("unable to create server from std::net::TcpListener")
            .serve(app.into_make_service())
            .await
            .unwrap();
    });

    format!("http://127.0.0.1:{}", addr.port())
}

#[tokio::test(flavor = "multi_thread")]
async fn register_vm_then_heartbeat_round_trips_over_http() {
    let base = spawn_server().await;
    let http = reqwest::Client::new();

    let resp: Value = http.post(format!("{base}/register_vm")).json(&json!({})).send().await.unwrap().json().await.unwrap();
    let pid = resp["pid"].as_u64().unwrap();

    let heartbeat: Value = http
        .post(format!("{base}/vm_heartbeat"))
        .json(&json!({ "pid": pid }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(heartbeat["thread_count"], 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_pid_surfaces_as_a_500_with_an_error_body() {
    let base = spawn_server().await;
    let http = reqwest::Client::new();

    let response = http.post(format!("{base}/vm_heartbeat")).json(&json!({ "pid": 999 })).send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("999"));
}

#[tokio::test(flavor = "multi_thread")]
async fn submit_call_returns_a_placeholder_id_for_every_named_output() {
    let base = spawn_server().await;
    let http = reqwest::Client::new();

    let pid: Value = http.post(format!("{base}/register_vm")).json(&json!({})).send().await.unwrap().json().await.unwrap();
    let pid = pid["pid"].as_u64().unwrap();

    let call = json!({
        "pid": pid,
        "call": {
            "body": "hello {{name}}",
            "inputs": { "name": { "const": "world" } },
            "outputs": {},
        }
    });
    let resp: Value = http.post(format!("{base}/submit_call")).json(&call).send().await.unwrap().json().await.unwrap();
    assert!(resp["outputs"].as_object().unwrap().is_empty());
}
