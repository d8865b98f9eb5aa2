use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": {
            "server": {
                "time": Utc::now(),
                "timezone": "UTC",
            },
        },
    }))
}
