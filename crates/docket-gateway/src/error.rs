//! Mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use docket_core::DocketError;

/// A domain error on its way out as `{"ok": false, "error": ...}`.
#[derive(Debug)]
pub struct ApiError(pub DocketError);

pub type ApiResult = Result<Json<serde_json::Value>, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            DocketError::NotFound { .. } => StatusCode::NOT_FOUND,
            DocketError::Validation(_) => StatusCode::BAD_REQUEST,
            DocketError::Computation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DocketError::Dispatch(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DocketError> for ApiError {
    fn from(err: DocketError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("❌ {}", self.0);
        }
        (status, Json(serde_json::json!({"ok": false, "error": self.0.to_string()}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(DocketError::not_found("node", 1)).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(DocketError::validation("x")).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError(DocketError::Computation("bad date".into())).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError(DocketError::Dispatch("down".into())).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError(DocketError::Database("locked".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_response_status() {
        let resp = ApiError(DocketError::not_found("rule", 3)).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
