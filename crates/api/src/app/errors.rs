use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use tracker_scheduler::ServiceError;

/// Error responses of the tracker API, rendered as plain text.
#[derive(Debug)]
pub enum ApiError {
    /// One line per failed check, in reporting order.
    BadRequest(Vec<String>),
    NotFound,
    Internal(String),
}

impl ApiError {
    pub fn bad_request(messages: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::BadRequest(messages.into_iter().map(Into::into).collect())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(_) => Self::NotFound,
            ServiceError::Validation(err) => Self::bad_request([err.to_string()]),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(messages) => (
                StatusCode::BAD_REQUEST,
                format!("Bad request:\n{}", messages.join("\n")),
            )
                .into_response(),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Error:\n{message}")).into_response()
            }
        }
    }
}
