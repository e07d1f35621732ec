//! HTTP API surface.
//!
//! This module owns request parsing and admission, and delegates the actual
//! work to [`MenuPipeline`]. Every response from the menu and translation
//! endpoints goes out as an [`Envelope`].

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::envelope::Envelope;
use crate::error::AppError;
use crate::pipeline::MenuPipeline;
use crate::rate_limit::{identity_from_headers, Admission, RateLimiter};

/// Human-readable service name returned by health endpoints.
pub const APP_NAME: &str = "menu-translate-server";
/// Service version string returned by health endpoints.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Runtime configuration loaded at startup.
    pub cfg: AppConfig,
    /// Admission gate in front of the pipeline.
    pub limiter: RateLimiter,
    /// OCR text to menu items.
    pub pipeline: MenuPipeline,
}

impl AppState {
    /// Constructs shared handler state.
    pub fn new(cfg: AppConfig, limiter: RateLimiter, pipeline: MenuPipeline) -> Self {
        Self {
            cfg,
            limiter,
            pipeline,
        }
    }
}

/// Body of `POST /api/parse-menu`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseMenuRequest {
    /// Raw OCR output for the menu image.
    pub english_text: String,
}

/// Body of `POST /api/translate`.
#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
}

/// Query of `GET /api/status`.
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Also send one small prompt to the backend.
    #[serde(default)]
    pub live: bool,
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/parse-menu", post(parse_menu))
        .route("/api/translate", post(translate))
        .with_state(state)
}

/// Liveness endpoint (`GET /health`).
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "name": APP_NAME,
        "version": APP_VERSION,
        "model": state.pipeline.model_id(),
    }))
}

/// Configuration check (`GET /api/status`).
///
/// Only `?live=true` calls the backend, and that call is rate limited like
/// any other inference request.
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut body = json!({
        "apiKeyConfigured": state.cfg.hf_api_key.is_some(),
        "model": state.pipeline.model_id(),
        "modelProfile": state.cfg.model_profile.as_str(),
        "counterStore": state.cfg.rate_limit.store.as_str(),
    });
    if !query.live {
        return Ok(Json(body));
    }

    admit(&state, &headers).await?;
    match state.pipeline.check_backend().await {
        Ok(()) => body["apiWorking"] = json!(true),
        Err(err) => {
            warn!(kind = err.kind(), detail = %err, "backend liveness check failed");
            body["apiWorking"] = json!(false);
            body["error"] = json!(err.kind());
        }
    }
    Ok(Json(body))
}

/// Turns OCR text into bilingual menu items (`POST /api/parse-menu`).
pub async fn parse_menu(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<ParseMenuRequest>, JsonRejection>,
) -> Result<Envelope, AppError> {
    let identity = admit(&state, &headers).await?;

    let Json(request) = body.map_err(invalid_body)?;
    let text = request.english_text.trim();
    if text.is_empty() {
        return Err(AppError::invalid_request("englishText must not be empty"));
    }

    info!(identity = %identity, chars = text.chars().count(), "parsing menu text");
    let items = state.pipeline.parse_menu(text).await?;
    info!(identity = %identity, items = items.len(), "parsed menu items");
    Ok(Envelope::Success(items))
}

/// Translates free text to Chinese (`POST /api/translate`).
pub async fn translate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<TranslateRequest>, JsonRejection>,
) -> Envelope {
    match translate_text(&state, &headers, body).await {
        Ok(text) => Envelope::Translated(text),
        Err(err) => Envelope::from_translate_error(&err),
    }
}

async fn translate_text(
    state: &AppState,
    headers: &HeaderMap,
    body: Result<Json<TranslateRequest>, JsonRejection>,
) -> Result<String, AppError> {
    let identity = admit(state, headers).await?;

    let Json(request) = body.map_err(invalid_body)?;
    let text = request.text.trim();
    if text.is_empty() {
        return Err(AppError::invalid_request("text must not be empty"));
    }

    info!(identity = %identity, chars = text.chars().count(), "translating text");
    state.pipeline.translate(text).await
}

/// Resolves the caller and charges the limiter; returns the identity.
async fn admit(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    let identity = identity_from_headers(
        headers,
        &state.cfg.rate_limit.identity_header,
        &state.cfg.rate_limit.anonymous_identity,
    );
    match state.limiter.admit(&identity).await {
        Admission::Allowed => Ok(identity),
        Admission::Denied(reason) => Err(AppError::RateLimited(reason)),
    }
}

fn invalid_body(err: JsonRejection) -> AppError {
    AppError::invalid_request(format!("invalid request body: {}", err.body_text()))
}
