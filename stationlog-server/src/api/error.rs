use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use stationlog_core::ValidationError;
use stationlog_vendor::VendorError;
use tracing::{error, warn};

use crate::aggregate::QueryError;
use crate::ingest::IngestError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden(String),
    /// The vendor refused the request; retrying will not help.
    FailedDependency(String),
    BadGateway(String),
    ServiceUnavailable(String),
    InternalServerError(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::FailedDependency(_) => StatusCode::FAILED_DEPENDENCY,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn storage(e: impl std::fmt::Display) -> Self {
        error!(error = %e, "storage failure");
        ApiError::InternalServerError(format!("storage error: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Unauthorized => "Authentication required".to_owned(),
            ApiError::BadRequest(msg)
            | ApiError::Forbidden(msg)
            | ApiError::FailedDependency(msg)
            | ApiError::BadGateway(msg)
            | ApiError::ServiceUnavailable(msg)
            | ApiError::InternalServerError(msg) => msg,
        };

        let body = ErrorResponse {
            success: false,
            error: message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<VendorError> for ApiError {
    fn from(e: VendorError) -> Self {
        warn!(error = %e, "vendor request failed");
        match &e {
            VendorError::Transport(_) => ApiError::ServiceUnavailable(e.to_string()),
            VendorError::Api { .. } if e.is_permanent() => {
                ApiError::FailedDependency(e.to_string())
            }
            VendorError::Api { .. } | VendorError::Decode(_) => {
                ApiError::BadGateway(e.to_string())
            }
            VendorError::Config(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Authorization { .. } => ApiError::Forbidden(e.to_string()),
            IngestError::Vendor(e) => e.into(),
            IngestError::Storage(e) => ApiError::storage(e),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::Validation(e) => e.into(),
            QueryError::Authorization { .. } => ApiError::Forbidden(e.to_string()),
            QueryError::Storage(e) => ApiError::storage(e),
        }
    }
}
