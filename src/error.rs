//! Application error types.
//!
//! Every variant is a distinct failure kind of the menu pipeline. Rendering to
//! HTTP goes through [`crate::envelope::Envelope`], which decides how much of
//! the error the caller gets to see.

use axum::response::{IntoResponse, Response};

use crate::envelope::Envelope;
use crate::rate_limit::DenyReason;

/// Error model used throughout admission, inference, and response recovery.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Required configuration (credential, endpoint) is missing or invalid.
    #[error("{0}")]
    Configuration(String),
    /// Admission was refused by the rate limiter.
    #[error("{0}")]
    RateLimited(DenyReason),
    /// The shared counter store could not be reached or answered garbage.
    #[error("{0}")]
    CounterStore(String),
    /// Transport failure or non-2xx status from the inference backend.
    #[error("{0}")]
    Backend(String),
    /// No JSON object span could be located in the completion.
    #[error("{0}")]
    UnparsableResponse(String),
    /// A JSON span was found but is not syntactically valid.
    #[error("{0}")]
    MalformedJson(String),
    /// Parsed JSON does not have the menu item shape.
    #[error("{0}")]
    Schema(String),
    /// Valid shape, but no usable items survived sanitization.
    #[error("no usable menu items in completion")]
    EmptyResult,
    /// The inbound request body is missing or unusable.
    #[error("{0}")]
    InvalidRequest(String),
}

impl AppError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a counter store error.
    pub fn counter_store(message: impl Into<String>) -> Self {
        Self::CounterStore(message.into())
    }

    /// Creates an inference backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Creates an unparsable-response error.
    pub fn unparsable(message: impl Into<String>) -> Self {
        Self::UnparsableResponse(message.into())
    }

    /// Creates a malformed-JSON error.
    pub fn malformed_json(message: impl Into<String>) -> Self {
        Self::MalformedJson(message.into())
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Stable label used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::RateLimited(_) => "rate_limit_denied",
            Self::CounterStore(_) => "counter_store_error",
            Self::Backend(_) => "backend_error",
            Self::UnparsableResponse(_) => "unparsable_response",
            Self::MalformedJson(_) => "malformed_json",
            Self::Schema(_) => "schema_error",
            Self::EmptyResult => "empty_result",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        Envelope::from_error(&self).into_response()
    }
}
