// ServiceError -> HTTP response mapping

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use gradebox_engine::error::ServiceError;
use serde_json::json;
use tracing::{error, warn};

use crate::metrics;

#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    /// The spawned request task died before producing an answer
    Internal(String),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

// Malformed bodies and query strings share the invalid_request contract
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Service(ServiceError::invalid(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Service(ServiceError::invalid(rejection.body_text()))
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Service(ServiceError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
            ApiError::Service(ServiceError::NotFound(_))
            | ApiError::Service(ServiceError::NoReferenceSolution(_)) => StatusCode::NOT_FOUND,
            ApiError::Service(ServiceError::Busy(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Service(ServiceError::Sandbox(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Service(ServiceError::Catalog(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Service(e) => e.kind(),
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();
        metrics::record_error(kind);

        let message = match &self {
            ApiError::Service(e) => e.to_string(),
            ApiError::Internal(msg) => msg.clone(),
        };

        if status.is_server_error() {
            error!(kind, error = %message, "Request failed");
        } else {
            warn!(kind, error = %message, "Request rejected");
        }

        let body = Json(json!({ "error": kind, "message": message }));

        match &self {
            ApiError::Service(ServiceError::Busy(wait)) => {
                let retry_after = wait.as_secs().max(1).to_string();
                (status, [(header::RETRY_AFTER, retry_after)], body).into_response()
            }
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebox_engine::error::SandboxError;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::invalid("empty"), StatusCode::BAD_REQUEST),
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::NoReferenceSolution("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Busy(Duration::from_secs(5)), StatusCode::SERVICE_UNAVAILABLE),
            (
                ServiceError::Sandbox(SandboxError::Crashed("gone".into())),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn test_busy_sets_retry_after() {
        let response = ApiError::from(ServiceError::Busy(Duration::from_millis(5000))).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "5");
    }
}
