//! HTTP API application wiring (axum router + service wiring).
//!
//! - `services.rs`: backend selection and tracker service start-up
//! - `routes/`: HTTP handlers
//! - `dto.rs`: request shapes
//! - `errors.rs`: plain-text error responses

use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Router};
use tower::ServiceBuilder;

use tracker_scheduler::TrackerApi;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the HTTP router around any tracker backend.
pub fn build_app(api: Arc<dyn TrackerApi>) -> Router {
    Router::new()
        .route("/new-tracker", post(routes::tracker::new_tracker))
        .route("/get-result", get(routes::tracker::get_result))
        .route("/health", get(routes::system::health))
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(api))
                .layer(axum::middleware::from_fn(log_request)),
        )
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();

    let response = next.run(request).await;

    tracing::info!(
        %method,
        %path,
        %query,
        status = response.status().as_u16(),
        "http request"
    );
    response
}
