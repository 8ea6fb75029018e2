//! Monitor error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cortex_common::models::ApiResponse;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream unavailable: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<cortex_common::CommonError> for MonitorError {
    fn from(err: cortex_common::CommonError) -> Self {
        match err {
            cortex_common::CommonError::Database(err) => MonitorError::Database(err),
            cortex_common::CommonError::Serialization(err) => MonitorError::Serialization(err),
            other => MonitorError::Internal(other.to_string()),
        }
    }
}

impl MonitorError {
    fn status_code(&self) -> StatusCode {
        match self {
            MonitorError::Validation(_) => StatusCode::BAD_REQUEST,
            MonitorError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            MonitorError::Forbidden(_) => StatusCode::FORBIDDEN,
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::Conflict(_) => StatusCode::CONFLICT,
            MonitorError::Upstream(_) => StatusCode::BAD_GATEWAY,
            MonitorError::Database(_)
            | MonitorError::Serialization(_)
            | MonitorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Client mistakes stay at info; only server-side failures are errors
        match status {
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => info!("{}", self),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::CONFLICT => {
                warn!("{}", self)
            }
            _ => error!("{}", self),
        }

        // No stack traces or internals leak to the caller
        let message = match &self {
            MonitorError::Database(_) | MonitorError::Internal(_) | MonitorError::Serialization(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ApiResponse::<()>::error(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_kinds() {
        assert_eq!(
            MonitorError::Validation("bad enum".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            MonitorError::NotFound("agent").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            MonitorError::Conflict("duplicate id".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            MonitorError::Unauthorized("bad token".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            MonitorError::Upstream("timed out".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn internal_details_do_not_leak() {
        let response = MonitorError::Internal("connection string with password".into())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
