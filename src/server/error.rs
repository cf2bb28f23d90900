use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::checkin::CheckInError;

/// [`CheckInError`] as a `{ success: false, .. }` JSON response.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct ApiError(#[from] pub CheckInError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match self.0 {
            CheckInError::InvalidInput => (
                StatusCode::BAD_REQUEST,
                json!({ "success": false, "message": message }),
            ),
            CheckInError::NotFound => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "message": message }),
            ),
            CheckInError::AlreadyCheckedIn(registration) => (
                StatusCode::CONFLICT,
                json!({ "success": false, "message": message, "data": registration }),
            ),
            CheckInError::Store(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "success": false, "error": message }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
