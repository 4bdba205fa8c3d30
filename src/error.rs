//! Error types shared across the storefront
//!
//! This module provides:
//! - Field-level validation errors used by value objects and forms
//! - Error codes with categories and retry classification
//! - The HTTP-facing `ApiError` and its JSON response shape

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// VALIDATION ERRORS
// =============================================================================

/// A single field failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Field is empty but must not be.
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Field is shorter than the minimum length.
    #[error("{field} must be at least {min} characters (got {actual})")]
    TooShort {
        field: &'static str,
        min: usize,
        actual: usize,
    },

    /// Field exceeds maximum length.
    #[error("{field} exceeds maximum length of {max} (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Field contains invalid character.
    #[error("{field} contains invalid character {character:?}")]
    InvalidCharacter {
        field: &'static str,
        character: char,
    },

    /// Field value is invalid for specified reason.
    #[error("{field} is invalid: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl ValidationError {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Empty(field) => field,
            ValidationError::TooShort { field, .. }
            | ValidationError::TooLong { field, .. }
            | ValidationError::InvalidCharacter { field, .. }
            | ValidationError::Invalid { field, .. } => field,
        }
    }
}

/// Every field error found while validating one form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    /// Records the error of `result`, if any, and passes the value through.
    pub fn check<T>(&mut self, result: Result<T, ValidationError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.push(error);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|error| error.field() == field)
    }

    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages = self.0.iter().map(ToString::to_string).collect::<Vec<_>>();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self(vec![error])
    }
}

// =============================================================================
// ERROR CODES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Request body or parameters could not be understood
    InvalidRequest,
    /// A field failed validation
    ValidationError,
    /// Session id is unknown or already ended
    SessionNotFound,
    /// Product id is not in the catalog
    ProductNotFound,
    /// Order id is not in the order book
    OrderNotFound,
    /// Checkout attempted on an empty cart
    EmptyCart,
    /// Order status change not allowed from the current status
    InvalidTransition,
    /// Order sink refused the order
    HandOffRejected,
    /// Order sink could not be reached after every retry
    HandOffUnavailable,
    /// Order sink did not answer in time
    HandOffTimeout,
}

impl ErrorCode {
    /// Check if this error type is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::HandOffUnavailable | ErrorCode::HandOffTimeout
        )
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest | ErrorCode::ValidationError => "client_error",
            ErrorCode::SessionNotFound | ErrorCode::ProductNotFound | ErrorCode::OrderNotFound => {
                "resource_not_found"
            }
            ErrorCode::EmptyCart | ErrorCode::InvalidTransition => "conflict",
            ErrorCode::HandOffRejected | ErrorCode::HandOffUnavailable => "upstream_error",
            ErrorCode::HandOffTimeout => "timeout",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::SessionNotFound
            | ErrorCode::ProductNotFound
            | ErrorCode::OrderNotFound => StatusCode::NOT_FOUND,
            ErrorCode::EmptyCart | ErrorCode::InvalidTransition => StatusCode::CONFLICT,
            ErrorCode::HandOffRejected | ErrorCode::HandOffUnavailable => {
                StatusCode::BAD_GATEWAY
            }
            ErrorCode::HandOffTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// API ERROR
// =============================================================================

/// Error returned by HTTP handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// Offending fields for validation failures
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn session_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::SessionNotFound, format!("session '{id}' not found"))
    }

    pub fn product_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ProductNotFound, format!("product '{id}' not found"))
    }

    pub fn order_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::OrderNotFound, format!("order '{id}' not found"))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        ValidationErrors::from(error).into()
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let fields = errors.iter().map(|e| e.field().to_string()).collect();
        Self {
            code: ErrorCode::ValidationError,
            message: errors.to_string(),
            fields,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: ErrorCode,
    category: &'static str,
    message: String,
    /// Whether the same request may succeed if sent again
    retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        crate::metrics::METRICS.record_api_error(self.code);
        let body = ErrorBody {
            code: self.code,
            category: self.code.category(),
            message: self.message,
            retryable: self.code.is_retryable(),
            fields: self.fields,
        };
        (self.code.status_code(), Json(body)).into_response()
    }
}
