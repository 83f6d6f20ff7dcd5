//! Error to HTTP response mapping

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use crate::error::{AdminError, ConnectionError, ErrorInfo, extract_error_info};

/// Result type for route handlers
pub type ApiResult<T> = std::result::Result<T, AdminError>;

impl AdminError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdminError::Validation(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Conflict(_) => StatusCode::CONFLICT,
            AdminError::Connection(ConnectionError::NotConnected) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AdminError::Connection(ConnectionError::InvalidUri(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn info(&self) -> ErrorInfo {
        match self {
            AdminError::MongoDb(err) => extract_error_info(err),
            AdminError::Validation(msg) => ErrorInfo::message(msg.clone()).with_type("validation"),
            AdminError::NotFound(msg) => ErrorInfo::message(msg.clone()).with_type("not_found"),
            AdminError::Conflict(msg) => ErrorInfo::message(msg.clone()).with_type("conflict"),
            AdminError::Connection(e) => ErrorInfo::message(e.to_string()).with_type("connection"),
            AdminError::Transfer(e) => ErrorInfo::message(e.to_string()).with_type("transfer"),
            other => ErrorInfo::message(other.to_string()),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self);
        }

        (status, Json(json!({ "success": false, "error": self.info() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransferError;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AdminError::Validation("missing db".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AdminError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AdminError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AdminError::from(ConnectionError::NotConnected).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AdminError::from(TransferError::Import("bad".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_shape() {
        let info = AdminError::Validation("Missing db".into()).info();
        let body = serde_json::to_value(info).unwrap();
        assert_eq!(body["message"], "Missing db");
        assert_eq!(body["type"], "validation");
        assert!(body.get("code").is_none());
    }
}
