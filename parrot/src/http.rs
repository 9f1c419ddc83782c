// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! The OS HTTP surface (§6 of the spec): one handler per route, each a thin JSON
//! wrapper around the matching [`pcore::PCore`] method.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use dispatcher::EngineConfig;
use engine_client::RuntimeInfo;
use log::debug;
use pcore::call::Call;
use pcore::{PCore, VmRuntimeInfo};
use process::Pid;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub fn router(core: Arc<PCore>) -> Router {
    Router::new()
        .route("/register_vm", post(register_vm))
        .route("/vm_heartbeat", post(vm_heartbeat))
        .route("/submit_call", post(submit_call))
        .route("/placeholder_fetch", post(placeholder_fetch))
        .route("/register_engine", post(register_engine))
        .route("/engine_heartbeat", post(engine_heartbeat))
        .with_state(core)
}

#[derive(Serialize)]
struct RegisterVmResponse {
    pid: Pid,
}

async fn register_vm(State(core): State<Arc<PCore>>) -> Result<Json<RegisterVmResponse>, ApiError> {
    let pid = core.register_vm()?;
    debug!("http: registered vm {pid}");
    Ok(Json(RegisterVmResponse { pid }))
}

#[derive(Deserialize)]
struct VmHeartbeatRequest {
    pid: Pid,
}

async fn vm_heartbeat(
    State(core): State<Arc<PCore>>,
    Json(req): Json<VmHeartbeatRequest>,
) -> Result<Json<VmRuntimeInfo>, ApiError> {
    Ok(Json(core.vm_heartbeat(req.pid)?))
}

#[derive(Deserialize)]
struct SubmitCallRequest {
    pid: Pid,
    call: Call,
}

/// The spec's routing table lists `/submit_call`'s response as `{}`, but a VM has no
/// other way to later `placeholder_fetch` or chain one of its own call's outputs —
/// see scenario 2 of §8, which fetches a later call's output by name. `outputs` carries
/// back exactly the mapping `submit_semantic_call` already computes for this purpose.
#[derive(Serialize)]
struct SubmitCallResponse {
    outputs: HashMap<String, u64>,
}

async fn submit_call(
    State(core): State<Arc<PCore>>,
    Json(req): Json<SubmitCallRequest>,
) -> Result<Json<SubmitCallResponse>, ApiError> {
    let outputs = core.submit_semantic_call(req.pid, req.call)?;
    Ok(Json(SubmitCallResponse { outputs: outputs.into_iter().map(|(name, id)| (name, id.0)).collect() }))
}

#[derive(Deserialize)]
struct PlaceholderFetchRequest {
    pid: Pid,
    placeholder_id: u64,
}

#[derive(Serialize)]
struct PlaceholderFetchResponse {
    content: String,
}

async fn placeholder_fetch(
    State(core): State<Arc<PCore>>,
    Json(req): Json<PlaceholderFetchRequest>,
) -> Result<Json<PlaceholderFetchResponse>, ApiError> {
    let content = core.placeholder_fetch(req.pid, svar::SvId(req.placeholder_id)).await?;
    Ok(Json(PlaceholderFetchResponse { content }))
}

#[derive(Deserialize)]
struct RegisterEngineRequest {
    /// Not part of `EngineConfig` itself: the dispatcher keys engines by address, not
    /// by anything carried in `engine_config`.
    addr: String,
    engine_config: EngineConfig,
}

#[derive(Serialize)]
struct RegisterEngineResponse {
    engine_id: dispatcher::EngineId,
}

async fn register_engine(
    State(core): State<Arc<PCore>>,
    Json(req): Json<RegisterEngineRequest>,
) -> Result<Json<RegisterEngineResponse>, ApiError> {
    let engine_id = core.register_engine(req.addr, req.engine_config)?;
    debug!("http: registered engine {engine_id}");
    Ok(Json(RegisterEngineResponse { engine_id }))
}

#[derive(Deserialize)]
struct EngineHeartbeatRequest {
    engine_id: dispatcher::EngineId,
    /// Accepted for wire compatibility with §6's documented request shape; this
    /// runtime does not track a separate display name per engine.
    #[serde(default)]
    #[allow(dead_code)]
    engine_name: Option<String>,
    runtime_info: RuntimeInfo,
}

#[derive(Serialize)]
struct Empty {}

async fn engine_heartbeat(
    State(core): State<Arc<PCore>>,
    Json(req): Json<EngineHeartbeatRequest>,
) -> Result<Json<Empty>, ApiError> {
    core.engine_heartbeat(req.engine_id, req.runtime_info)?;
    Ok(Json(Empty {}))
}

#[cfg(test)]
mod tests;
