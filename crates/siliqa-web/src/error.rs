//! Error-to-status mapping for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use siliqa_common::SiliqaError;

pub struct ApiError(pub SiliqaError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<SiliqaError> for ApiError {
    fn from(err: SiliqaError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError(SiliqaError::NotFound(what.into()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(SiliqaError::InvalidInput(message.into()))
    }

    fn status(&self) -> StatusCode {
        match &self.0 {
            SiliqaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            SiliqaError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(
            ApiError(SiliqaError::InvalidInput("bad ext".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(SiliqaError::NotFound("task".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(SiliqaError::Provider("llm down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError(SiliqaError::Parse("broken pdf".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
