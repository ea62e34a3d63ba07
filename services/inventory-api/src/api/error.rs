//! Problem-details errors for the machine endpoints.
//!
//! The sync endpoint answers in its own `{ success, message, errorDetail }`
//! shape and does not use this type.

use axum::{
    extract::rejection::JsonRejection,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::DbError;

/// RFC 7807 body.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

#[derive(Debug, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
    pub details: Vec<FieldError>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            request_id: None,
            details: Vec::new(),
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn service_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    /// 503 when the database is unreachable, 500 otherwise.
    pub fn storage(err: &DbError, message: impl Into<String>) -> Self {
        if err.is_unavailable() {
            Self::service_unavailable("store_unavailable", message)
        } else {
            Self::internal("internal_error", message)
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_details(mut self, details: Vec<FieldError>) -> Self {
        self.details = details;
        self
    }

    /// Only an unreachable dependency is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        self.status == StatusCode::SERVICE_UNAVAILABLE
    }

    fn into_problem(self) -> ProblemDetails {
        let retryable = self.is_retryable();
        let request_id = self.request_id.unwrap_or_else(|| "unknown".to_string());
        ProblemDetails {
            r#type: format!("/problems/{}", self.code),
            title: self
                .status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            status: self.status.as_u16(),
            detail: self.message,
            instance: Some(request_id.clone()),
            code: self.code,
            request_id,
            retryable,
            details: self.details,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("invalid_body", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, Json(self.into_problem())).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_carries_request_id() {
        let problem = ApiError::bad_request("invalid_hostname", "hostname is required")
            .with_request_id("req_1")
            .into_problem();
        assert_eq!(problem.status, 400);
        assert_eq!(problem.request_id, "req_1");
        assert_eq!(problem.instance.as_deref(), Some("req_1"));
        assert_eq!(problem.r#type, "/problems/invalid_hostname");
        assert_eq!(problem.title, "Bad Request");
        assert!(!problem.retryable);
    }

    #[test]
    fn test_storage_error_mapping() {
        let down = ApiError::storage(&DbError::Query(sqlx::Error::PoolTimedOut), "x");
        assert_eq!(down.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(down.is_retryable());

        let broken = ApiError::storage(&DbError::Query(sqlx::Error::RowNotFound), "x");
        assert_eq!(broken.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!broken.is_retryable());
    }

    #[test]
    fn test_problem_content_type() {
        let response = ApiError::not_found("machine_not_found", "no such machine").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
