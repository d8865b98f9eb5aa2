use std::any::Any;

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::cors::{self, CorsLayer};
use tracing::error;

use mailqueue_core::RequestId;

use crate::app::errors;
use crate::context::RequestContext;

/// Response header echoing the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Attach a fresh [`RequestContext`] to every request and echo its id back.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::new();
    req.extensions_mut().insert(RequestContext::new(request_id));

    let mut res = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

/// Answer every `OPTIONS` request with an empty 200.
///
/// Preflights never get this far (the CORS layer answers them); this covers
/// bare `OPTIONS` probes.
pub async fn options_ok(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}

/// Any origin may call `GET`/`POST` with JSON bodies.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Turn a handler panic into the generic 500 response.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");

    let request_id = RequestId::new();
    error!(%request_id, panic = message, "request handler panicked");

    errors::json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        request_id,
        "internal server error",
        errors::detail("message", "an unexpected error occurred"),
    )
}
