// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{EngineClientError, PingResponse, RuntimeInfo};

#[test]
fn engine_client_error_displays_whether_it_is_retryable() {
    let retryable = EngineClientError::Retryable("connection reset".to_owned());
    assert_eq!(retryable.to_string(), "connection reset (retryable)");

    let permanent = EngineClientError::Permanent("unknown context".to_owned());
    assert_eq!(permanent.to_string(), "unknown context (not retryable)");
}

#[test]
fn engine_client_error_converts_into_its_message() {
    let err = EngineClientError::Permanent("bad request".to_owned());
    let msg: String = err.into();
    assert_eq!(msg, "bad request");
}

#[test]
fn ping_response_round_trips_through_json() {
    let response = PingResponse {
        pong: true,
        runtime_info: RuntimeInfo { pending_jobs: 3, free_capacity: 5 },
    };
    let encoded = serde_json::to_string(&response).unwrap();
    let decoded: PingResponse = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded, response);
}
