use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use cadence_core::error::CadenceError;

/// A domain error on its way out as an HTTP response.
pub struct ApiError(pub CadenceError);

impl From<CadenceError> for ApiError {
    fn from(e: CadenceError) -> Self {
        Self(e)
    }
}

pub fn status_for(e: &CadenceError) -> StatusCode {
    match e {
        CadenceError::Validation(_) => StatusCode::BAD_REQUEST,
        CadenceError::Unauthenticated => StatusCode::UNAUTHORIZED,
        CadenceError::Forbidden => StatusCode::FORBIDDEN,
        CadenceError::NotFound { .. } => StatusCode::NOT_FOUND,
        CadenceError::Resolution(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CadenceError::Capability { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
