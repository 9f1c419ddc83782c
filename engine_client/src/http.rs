// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use graph::SamplingConfig;
use log::debug;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tokio_retry2::strategy::ExponentialFactorBackoff;
use tokio_retry2::{Retry, RetryError};

use crate::{EngineClient, EngineClientError, PingResponse};

fn jitter(duration: Duration) -> Duration {
    duration.mul_f64(rand::random::<f64>())
}

#[derive(Serialize)]
struct FillRequest<'a> {
    context_id: u64,
    tokens: &'a [String],
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    context_id: u64,
    sampling_config: &'a SamplingConfig,
}

#[derive(Deserialize)]
struct GenerateResponse {
    tokens: String,
}

#[derive(Serialize)]
struct FreeContextRequest {
    context_id: u64,
}

/// A live `EngineClient` backed by `reqwest`, retrying transient failures with
/// jittered exponential backoff up to `max_attempts` total tries.
pub struct HttpEngineClient {
    http: reqwest::Client,
    max_attempts: usize,
    initial_delay: Duration,
}

impl HttpEngineClient {
    pub fn new(max_attempts: usize, initial_delay: Duration) -> HttpEngineClient {
        HttpEngineClient {
            http: reqwest::Client::new(),
            max_attempts: max_attempts.max(1),
            initial_delay,
        }
    }

    /// Runs `attempt` up to `self.max_attempts` times, backing off exponentially
    /// (with full jitter) between `Retryable` failures. A `Permanent` failure or
    /// exhausting the attempt budget both surface as the last error observed.
    async fn with_retry<T, F, Fut>(&self, op: &str, attempt: F) -> Result<T, EngineClientError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, EngineClientError>>,
    {
        let strategy = ExponentialFactorBackoff::from_millis(self.initial_delay.as_millis() as u64, 2.0)
            .map(jitter)
            .take(self.max_attempts - 1);

        let mut attempt_number = 0usize;
        Retry::spawn(strategy, || {
            attempt_number += 1;
            debug!("engine {op}: attempt #{attempt_number}");
            async {
                attempt().await.map_err(|err| match err {
                    EngineClientError::Retryable(msg) => RetryError::transient(msg),
                    EngineClientError::Permanent(msg) => RetryError::permanent(msg),
                })
            }
        })
        .await
        .map_err(EngineClientError::Permanent)
    }

    async fn classify(response: reqwest::Result<Response>, what: &str) -> Result<Response, EngineClientError> {
        let response = response.map_err(|err| EngineClientError::Retryable(format!("{what}: {err}")))?;
        if response.status().is_server_error() {
            Err(EngineClientError::Retryable(format!(
                "{what}: server error ({})",
                response.status()
            )))
        } else if response.status().is_client_error() {
            Err(EngineClientError::Permanent(format!(
                "{what}: client error ({})",
                response.status()
            )))
        } else {
            Ok(response)
        }
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn ping(&self, addr: &str) -> Result<PingResponse, EngineClientError> {
        let url = format!("{addr}/ping");
        self.with_retry("ping", || async {
            let response = Self::classify(self.http.post(&url).send().await, "ping").await?;
            response
                .json::<PingResponse>()
                .await
                .map_err(|err| EngineClientError::Retryable(format!("ping: malformed response: {err}")))
        })
        .await
    }

    async fn fill(&self, addr: &str, context_id: u64, tokens: &[String]) -> Result<(), EngineClientError> {
        let url = format!("{addr}/fill");
        self.with_retry("fill", || async {
            let body = FillRequest { context_id, tokens };
            Self::classify(self.http.post(&url).json(&body).send().await, "fill").await?;
            Ok(())
        })
        .await
    }

    async fn generate(
        &self,
        addr: &str,
        context_id: u64,
        sampling_config: &SamplingConfig,
    ) -> Result<String, EngineClientError> {
        let url = format!("{addr}/generate");
        self.with_retry("generate", || async {
            let body = GenerateRequest { context_id, sampling_config };
            let response = Self::classify(self.http.post(&url).json(&body).send().await, "generate").await?;
            response
                .json::<GenerateResponse>()
                .await
                .map(|r| r.tokens)
                .map_err(|err| EngineClientError::Retryable(format!("generate: malformed response: {err}")))
        })
        .await
    }

    async fn free_context(&self, addr: &str, context_id: u64) -> Result<(), EngineClientError> {
        let url = format!("{addr}/free_context");
        self.with_retry("free_context", || async {
            let body = FreeContextRequest { context_id };
            Self::classify(self.http.post(&url).json(&body).send().await, "free_context").await?;
            Ok(())
        })
        .await
    }
}
