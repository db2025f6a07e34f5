//! Error envelope conventions for the Boundary Facade.
//!
//! Per the API's transport contract, most domain failures (unknown
//! channel, unresolved alignment reference, oversized upload) are
//! reported inside a `200 OK` JSON body with `error: true` rather than by
//! status code. [`ApiError`] exists only for genuine transport failures
//! (malformed multipart, I/O failure writing an upload) that warrant a
//! non-2xx status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
        }
    }
}

pub struct ApiError(pub StatusCode, pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody::new(self.1))).into_response()
    }
}

/// Builds an in-body error envelope for handlers that always answer
/// `200 OK`.
pub fn error_json(message: impl Into<String>) -> Json<Value> {
    Json(json!({ "error": true, "message": message.into() }))
}
