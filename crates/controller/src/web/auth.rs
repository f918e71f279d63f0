// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token authentication for both API surfaces.

use crate::web::AppState;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// An error response with a JSON body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub details: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, details: impl Into<String>) -> Self {
        Self {
            status,
            error,
            details: details.into(),
        }
    }

    pub fn unauthorized() -> Self {
        // Deliberately vague: do not reveal whether the token was missing,
        // malformed or simply wrong
        Self::new(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "Authentication failed",
        )
    }

    pub fn server_error() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server error",
            "An internal error occurred",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({"error": self.error, "details": self.details})),
        )
            .into_response()
    }
}

fn bearer_token<'h>(headers: &'h HeaderMap) -> Option<&'h str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
}

/// The agent task RPC: one token per backend.
///
/// An unknown backend is a 404 so probing with a bad token cannot
/// distinguish unknown backends from wrong tokens.
pub fn require_backend_auth(
    state: &AppState,
    headers: &HeaderMap,
    backend: &str,
) -> Result<(), ApiError> {
    if !state.config.is_known_backend(backend) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "Not found",
            format!("Backend '{backend}' not found"),
        ));
    }
    let token = bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    let expected = state.config.job_server_tokens.get(backend);
    if expected.map(String::as_str) != Some(token) {
        return Err(ApiError::unauthorized());
    }
    Ok(())
}

/// The client API: each token maps to the backends it may operate on.
pub fn client_token_backends(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Vec<String>, ApiError> {
    let token = bearer_token(headers).ok_or_else(ApiError::unauthorized)?;
    let backends = state.config.backends_for_client_token(token);
    if backends.is_empty() {
        return Err(ApiError::unauthorized());
    }
    Ok(backends)
}
