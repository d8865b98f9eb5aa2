use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use mailqueue_core::{RequestId, ValidationError};

use crate::app::services::IntakeError;

/// Field → message map carried in error responses.
pub type Details = BTreeMap<String, String>;

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: Details,
    pub request_id: RequestId,
}

pub fn json_error(
    status: StatusCode,
    request_id: RequestId,
    error: impl Into<String>,
    details: Details,
) -> Response {
    (
        status,
        axum::Json(ErrorBody {
            error: error.into(),
            details,
            request_id,
        }),
    )
        .into_response()
}

pub fn detail(key: &str, value: impl Into<String>) -> Details {
    Details::from([(key.to_string(), value.into())])
}

/// Body did not parse as the expected JSON shape.
pub fn invalid_request(request_id: RequestId, error: &str, rejection: JsonRejection) -> Response {
    json_error(
        StatusCode::BAD_REQUEST,
        request_id,
        error,
        detail("message", rejection.body_text()),
    )
}

pub fn validation_failed(request_id: RequestId, errors: &[ValidationError]) -> Response {
    let details = errors
        .iter()
        .map(|e| (e.field().to_string(), validation_message(e).to_string()))
        .collect();
    json_error(StatusCode::BAD_REQUEST, request_id, "validation failed", details)
}

pub fn validation_message(err: &ValidationError) -> &'static str {
    match err {
        ValidationError::Required { .. } => "this field is required",
        ValidationError::TooLong { .. } => "value is too long",
        ValidationError::InvalidAddress(_) => "invalid email format",
    }
}

pub fn enqueue_failed(request_id: RequestId, err: &IntakeError) -> Response {
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        request_id,
        "failed to queue email",
        detail("reason", err.to_string()),
    )
}
