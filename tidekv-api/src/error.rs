//! Error Types for the tidekv API
//!
//! This module defines error handling for the HTTP layer:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//! - Mapping from core `KvError`s
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.
//! Store failures are always 500, client mistakes 400, missing keys 404.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tidekv_core::{KvError, LogError, ValidationError};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Key was never written or its latest record is a tombstone
    KeyNotFound,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// The durable log rejected or failed the operation
    LogUnavailable,

    /// A log store call exceeded its deadline
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::MissingField => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::KeyNotFound => StatusCode::NOT_FOUND,
            // A timed-out log call is a store failure like any other.
            ErrorCode::InternalError | ErrorCode::LogUnavailable | ErrorCode::Timeout => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn key_not_found(key: &str) -> Self {
        Self::new(ErrorCode::KeyNotFound, format!("Key '{}' not found", key))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn log_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LogUnavailable, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// Convert core errors, following the propagation policy: validation is the
/// client's fault, everything the log reports is a 500, and anything else
/// reaching a handler is an internal error.
impl From<KvError> for ApiError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Validation(ValidationError::RequiredFieldMissing { field }) => {
                ApiError::missing_field(&field)
            }
            KvError::Validation(e @ ValidationError::InvalidValue { .. }) => {
                ApiError::validation_failed(e.to_string())
            }
            KvError::Log(LogError::Timeout { operation, .. }) => {
                tracing::error!(operation, "Log store call timed out");
                ApiError::timeout(operation)
            }
            KvError::Log(e) => {
                tracing::error!(error = %e, "Log store error");
                ApiError::log_unavailable(e.to_string())
            }
            other => {
                tracing::error!(error = %other, "Unexpected error in request path");
                ApiError::internal_error("Internal server error")
            }
        }
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tidekv_core::CacheError;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::MissingField.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::KeyNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::LogUnavailable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ErrorCode::Timeout.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_kv_error_mapping() {
        let missing: ApiError = KvError::from(ValidationError::RequiredFieldMissing {
            field: "key".to_string(),
        })
        .into();
        assert_eq!(missing.code, ErrorCode::MissingField);
        assert!(missing.message.contains("key"));

        let timeout: ApiError = KvError::from(LogError::Timeout {
            operation: "append",
            elapsed: Duration::from_secs(2),
        })
        .into();
        assert_eq!(timeout.code, ErrorCode::Timeout);
        assert_eq!(timeout.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let cache: ApiError = KvError::from(CacheError::Unavailable {
            reason: "down".to_string(),
        })
        .into();
        assert_eq!(cache.code, ErrorCode::InternalError);
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::key_not_found("user:1");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("KEY_NOT_FOUND"));
        assert!(json.contains("user:1"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_body_shape() -> Result<(), serde_json::Error> {
        let err = ApiError::missing_field("value");
        assert_eq!(format!("{}", err), "MissingField: Required field 'value' is missing");

        let body = serde_json::to_value(&err)?;
        assert_eq!(
            body,
            serde_json::json!({
                "code": "MISSING_FIELD",
                "message": "Required field 'value' is missing"
            })
        );
        Ok(())
    }
}
