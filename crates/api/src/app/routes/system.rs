use std::sync::Arc;

use axum::extract::Extension;
use axum::response::IntoResponse;
use axum::Json;

use tracker_scheduler::TrackerApi;

use crate::app::errors::ApiError;

pub async fn health(Extension(api): Extension<Arc<dyn TrackerApi>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "dispatcher": api.stats(),
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
