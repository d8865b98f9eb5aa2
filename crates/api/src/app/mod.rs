//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: the producer side of the email queue
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs and request validation
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, IntakeError, SharedStore};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
        .layer(
            ServiceBuilder::new()
                .layer(middleware::cors_layer())
                .layer(CatchPanicLayer::custom(middleware::panic_response))
                .layer(axum::middleware::from_fn(middleware::options_ok))
                .layer(axum::middleware::from_fn(middleware::request_context)),
        )
}
