// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::too_many_arguments)]

//! The Engine RPC interface consumed by the Thread Dispatcher (§4.6, §6): `ping`,
//! `fill`, `generate` and `free_context` against an inference engine reachable over
//! HTTP. Retries are bounded exponential backoff, grounded on the same
//! `tokio_retry2`/`Retry`/`Retryable`-vs-`Permanent` split the teacher uses for its
//! own network fetches.

mod http;

pub use crate::http::HttpEngineClient;

use std::fmt;

use async_trait::async_trait;
use graph::SamplingConfig;
use serde::{Deserialize, Serialize};

/// A snapshot of one engine's load, as reported by `ping`/`engine_heartbeat` (§6).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub pending_jobs: usize,
    pub free_capacity: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PingResponse {
    pub pong: bool,
    pub runtime_info: RuntimeInfo,
}

/// Errors from an Engine RPC. The `Retryable`/`Permanent` split mirrors the
/// distinction the dispatcher needs to make: a dropped connection or a 5xx is worth
/// another attempt within the backoff budget, but a 4xx (bad context id, malformed
/// request) never will succeed by retrying it.
#[derive(Debug)]
pub enum EngineClientError {
    Retryable(String),
    Permanent(String),
}

impl fmt::Display for EngineClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineClientError::Retryable(msg) => write!(f, "{msg} (retryable)"),
            EngineClientError::Permanent(msg) => write!(f, "{msg} (not retryable)"),
        }
    }
}

impl std::error::Error for EngineClientError {}

impl From<EngineClientError> for String {
    fn from(err: EngineClientError) -> String {
        match err {
            EngineClientError::Retryable(msg) | EngineClientError::Permanent(msg) => msg,
        }
    }
}

/// The RPC surface the dispatcher drives an engine through, independent of transport.
/// Tests and the dispatcher's own unit tests exercise this via an in-process mock
/// rather than `HttpEngineClient`.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn ping(&self, addr: &str) -> Result<PingResponse, EngineClientError>;

    /// Appends `tokens` to the engine-side context named `context_id`, creating it if
    /// this is the first fill the context has seen.
    async fn fill(&self, addr: &str, context_id: u64, tokens: &[String]) -> Result<(), EngineClientError>;

    /// Generates and returns the content for `context_id`'s next output variable.
    async fn generate(
        &self,
        addr: &str,
        context_id: u64,
        sampling_config: &SamplingConfig,
    ) -> Result<String, EngineClientError>;

    /// Releases the engine-side resources held for `context_id` once its owning
    /// Process no longer needs them (§4.5 thread reclamation).
    async fn free_context(&self, addr: &str, context_id: u64) -> Result<(), EngineClientError>;
}

#[cfg(test)]
mod tests;
