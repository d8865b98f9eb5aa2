use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tracing::{error, info, warn};

use crate::app::dto::{self, BulkSendRequest, BulkSendResponse, QueuedResponse, SendEmailRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/send", post(send_email))
        .route("/bulk-send", post(bulk_send))
}

pub async fn send_email(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Response {
    let request_id = ctx.request_id();
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::invalid_request(request_id, "invalid request", rejection),
    };

    let task = match body.into_task() {
        Ok(task) => task,
        Err(errs) => return errors::validation_failed(request_id, &errs),
    };

    match services.enqueue(task).await {
        Ok(task) => (StatusCode::ACCEPTED, Json(QueuedResponse::new(&task))).into_response(),
        Err(e) => {
            error!(%request_id, error = %e, "failed to queue email");
            errors::enqueue_failed(request_id, &e)
        }
    }
}

pub async fn bulk_send(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    body: Result<Json<BulkSendRequest>, JsonRejection>,
) -> Response {
    let request_id = ctx.request_id();
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return errors::invalid_request(request_id, "invalid bulk email request", rejection);
        }
    };

    let count = body.emails.len();
    if count == 0 || count > dto::MAX_BULK_EMAILS {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            request_id,
            "invalid bulk email request",
            errors::detail(
                "message",
                format!("emails must contain between 1 and {} items", dto::MAX_BULK_EMAILS),
            ),
        );
    }

    let mut failed = Vec::new();
    let mut pending = Vec::with_capacity(count);
    for item in body.emails {
        let raw_to = item.to.clone();
        match item.into_task() {
            Ok(task) => {
                let services = services.clone();
                let to = task.to.clone();
                pending.push((to, tokio::spawn(async move { services.enqueue(task).await })));
            }
            Err(errs) => {
                warn!(%request_id, to = %raw_to, errors = errs.len(), "bulk item failed validation");
                failed.push(raw_to);
            }
        }
    }

    let mut succeeded = Vec::with_capacity(pending.len());
    for (to, handle) in pending {
        match handle.await {
            Ok(Ok(_)) => succeeded.push(to),
            Ok(Err(e)) => {
                error!(%request_id, %to, error = %e, "failed to queue bulk email");
                failed.push(to);
            }
            Err(e) => {
                error!(%request_id, %to, error = %e, "bulk enqueue task aborted");
                failed.push(to);
            }
        }
    }

    info!(
        %request_id,
        succeeded = succeeded.len(),
        failed = failed.len(),
        "bulk email request processed"
    );

    let response = BulkSendResponse::new(succeeded, failed);
    let status = if response.is_partial() {
        StatusCode::MULTI_STATUS
    } else {
        StatusCode::ACCEPTED
    };
    (status, Json(response)).into_response()
}
