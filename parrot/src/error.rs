// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Maps [`pcore::Error`] onto the wire shape spec.md §7 describes: every error response
//! is HTTP 500 with a `{error}` JSON body, regardless of whether it originated as a
//! `UserError` or an `InternalError` — the distinction is carried in the message text,
//! not the status code, since the spec draws no routing table for error status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

pub struct ApiError(pub pcore::Error);

impl From<pcore::Error> for ApiError {
    fn from(e: pcore::Error) -> ApiError {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
