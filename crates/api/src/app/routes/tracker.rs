use std::sync::Arc;

use axum::extract::{Extension, Form, Query};
use axum::Json;
use tracing::error;

use tracker_core::{JobId, JobResult, validate_tracker_request};
use tracker_scheduler::{ServiceError, TrackerApi};

use crate::app::dto::{NewTrackerForm, ResultQuery};
use crate::app::errors::ApiError;

/// `POST /new-tracker`: validate, schedule, answer `id:<job id>`.
pub async fn new_tracker(
    Extension(api): Extension<Arc<dyn TrackerApi>>,
    Form(form): Form<NewTrackerForm>,
) -> Result<String, ApiError> {
    let request =
        validate_tracker_request(&form.period, &form.frequency).map_err(ApiError::bad_request)?;

    match api.new_job(request.period, request.frequency).await {
        Ok(id) => Ok(format!("id:{id}")),
        Err(err) => {
            error!(error = %err, "cannot create tracker");
            Err(err.into())
        }
    }
}

/// `GET /get-result?id=<job id>`: the finalized result as JSON.
pub async fn get_result(
    Extension(api): Extension<Arc<dyn TrackerApi>>,
    Query(query): Query<ResultQuery>,
) -> Result<Json<JobResult>, ApiError> {
    let raw = query.id.trim();
    if raw.is_empty() {
        return Err(ApiError::bad_request(["Not specified id"]));
    }
    let id: JobId = raw.parse().map_err(|_| ApiError::NotFound)?;

    match api.get_result(id).await {
        Ok(result) => Ok(Json(result)),
        Err(ServiceError::NotFound(_)) => Err(ApiError::NotFound),
        Err(err) => {
            error!(job_id = %id, error = %err, "cannot get result");
            Err(err.into())
        }
    }
}
