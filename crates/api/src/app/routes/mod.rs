use axum::Router;

pub mod emails;
pub mod system;

/// Router for the intake endpoints under `/api`.
pub fn router() -> Router {
    Router::new().nest("/api", emails::router())
}
