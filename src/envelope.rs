//! Uniform response contract for the menu and translation endpoints.
//!
//! Callers see `{ "success": true, "menuItems": [...] }`,
//! `{ "success": true, "translatedText": "..." }` or
//! `{ "success": false, "error": "..." }`. Failure detail stays in the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::validate::MenuItem;

/// Message returned for every pipeline failure.
pub const PARSE_FAILURE_MESSAGE: &str = "failed to parse menu items";
/// Message returned for every translation failure.
pub const TRANSLATE_FAILURE_MESSAGE: &str = "failed to translate text";

/// Outcome of one menu or translation request.
#[derive(Debug)]
pub enum Envelope {
    Success(Vec<MenuItem>),
    Translated(String),
    Failure { status: StatusCode, message: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeBody {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    menu_items: Option<Vec<MenuItem>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    translated_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Envelope {
    /// Maps an error to its caller-facing form and logs the detail.
    pub fn from_error(err: &AppError) -> Self {
        Self::from_error_with(err, PARSE_FAILURE_MESSAGE)
    }

    /// Same mapping for the translation endpoint.
    pub fn from_translate_error(err: &AppError) -> Self {
        Self::from_error_with(err, TRANSLATE_FAILURE_MESSAGE)
    }

    fn from_error_with(err: &AppError, generic: &str) -> Self {
        let kind = err.kind();
        match err {
            AppError::RateLimited(reason) => {
                info!(kind, reason = %reason, "request denied by rate limiter");
                Self::Failure {
                    status: StatusCode::TOO_MANY_REQUESTS,
                    message: reason.to_string(),
                }
            }
            AppError::InvalidRequest(message) => {
                info!(kind, detail = %message, "rejected request");
                Self::Failure {
                    status: StatusCode::BAD_REQUEST,
                    message: message.clone(),
                }
            }
            AppError::Configuration(_) | AppError::CounterStore(_) => {
                error!(kind, detail = %err, "pipeline failed");
                Self::internal(generic)
            }
            _ => {
                warn!(kind, detail = %err, "pipeline failed");
                Self::internal(generic)
            }
        }
    }

    fn internal(message: &str) -> Self {
        Self::Failure {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Success(_) | Self::Translated(_) => StatusCode::OK,
            Self::Failure { status, .. } => *status,
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::Success(items) => EnvelopeBody {
                success: true,
                menu_items: Some(items),
                translated_text: None,
                error: None,
            },
            Self::Translated(text) => EnvelopeBody {
                success: true,
                menu_items: None,
                translated_text: Some(text),
                error: None,
            },
            Self::Failure { message, .. } => EnvelopeBody {
                success: false,
                menu_items: None,
                translated_text: None,
                error: Some(message),
            },
        };
        (status, Json(body)).into_response()
    }
}
