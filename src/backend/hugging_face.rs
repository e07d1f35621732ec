//! Hugging Face Inference API backend.
//!
//! One POST per call, no retries. The completion is returned exactly as the
//! service produced it; repairing it is the normalizer's job.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info};

use crate::backend::CompletionBackend;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::prompt::PromptPayload;

const ERROR_SNIPPET_CHARS: usize = 400;

/// Text-generation client for `api-inference.huggingface.co`-style endpoints.
pub struct HuggingFaceBackend {
    client: Client,
    api_base: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HuggingFaceBackend {
    /// Prepares the HTTP client. A missing API key is not an error here.
    pub fn new(cfg: &AppConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(cfg.inference_timeout)
            .build()
            .map_err(|err| AppError::configuration(format!("failed to create HTTP client: {err}")))?;
        Ok(Self {
            client,
            api_base: cfg.hf_api_base.trim_end_matches('/').to_string(),
            api_key: cfg.hf_api_key.clone(),
            timeout: cfg.inference_timeout,
        })
    }

    fn model_url(&self, model: &str) -> String {
        format!("{}/{}", self.api_base, model.trim_matches('/'))
    }
}

#[async_trait]
impl CompletionBackend for HuggingFaceBackend {
    async fn infer(&self, payload: &PromptPayload) -> Result<String, AppError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::configuration("HF_API_KEY is not configured"))?;

        let url = self.model_url(&payload.model);
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    AppError::backend(format!(
                        "inference request to {url} timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    AppError::backend(format!("inference request to {url} failed: {err}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| AppError::backend(format!("failed to read inference response: {err}")))?;

        info!(
            model = %payload.model,
            status = status.as_u16(),
            elapsed_ms = elapsed_millis(started.elapsed()),
            "inference call finished"
        );

        if !status.is_success() {
            return Err(AppError::backend(extract_error_message(status, &body)));
        }

        let completion = extract_generated_text(&body)?;
        debug!(chars = completion.chars().count(), "received completion");
        Ok(completion)
    }
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Pulls `generated_text` out of either `[{...}]` or `{...}` response shapes.
fn extract_generated_text(body: &str) -> Result<String, AppError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| AppError::backend(format!("inference response is not JSON: {err}")))?;
    let entry = match &value {
        Value::Array(entries) => entries.first(),
        other => Some(other),
    };
    entry
        .and_then(|entry| entry.get("generated_text"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::backend("inference response has no generated_text"))
}

fn extract_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let message = value
            .get("error")
            .and_then(|err| err.as_str().or_else(|| err.get("message").and_then(Value::as_str)));
        if let Some(message) = message {
            return format!("HTTP {}: {message}", status.as_u16());
        }
    }

    let trimmed = body.trim();
    let snippet = if trimmed.chars().count() > ERROR_SNIPPET_CHARS {
        format!(
            "{}...",
            trimmed.chars().take(ERROR_SNIPPET_CHARS).collect::<String>()
        )
    } else {
        trimmed.to_string()
    };
    format!("HTTP {}: {snippet}", status.as_u16())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::prompt::{build, ModelProfile};
    use crate::test_support::{serve, test_config as cfg};

    #[test]
    fn generated_text_from_array_or_object() {
        assert_eq!(
            extract_generated_text(r#"[{"generated_text": " {\"items\": []} "}]"#).unwrap(),
            r#" {"items": []} "#
        );
        assert_eq!(
            extract_generated_text(r#"{"generated_text": "hi"}"#).unwrap(),
            "hi"
        );
        assert!(extract_generated_text(r#"[]"#).is_err());
        assert!(extract_generated_text("<html>").is_err());
    }

    #[test]
    fn error_message_prefers_upstream_error_field() {
        assert_eq!(
            extract_error_message(
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"error": "Model is currently loading"}"#
            ),
            "HTTP 503: Model is currently loading"
        );
        let long = "x".repeat(1000);
        let msg = extract_error_message(StatusCode::BAD_GATEWAY, &long);
        assert!(msg.starts_with("HTTP 502: xxx"));
        assert!(msg.ends_with("..."));
        assert!(msg.len() < 420);
    }

    #[tokio::test]
    async fn missing_api_key_is_configuration_error() {
        let backend = HuggingFaceBackend::new(&cfg("http://127.0.0.1:9", None)).unwrap();
        let payload = build("Tea $2", ModelProfile::Mixtral, "test/model");
        let err = backend.infer(&payload).await.unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn returns_completion_unmodified() {
        let router = Router::new().route(
            "/test/model",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["parameters"]["return_full_text"], false);
                assert!(body["inputs"].as_str().unwrap().contains("Tea $2"));
                Json(json!([{"generated_text": "```json\n{\"items\": []}\n```"}]))
            }),
        );
        let base = serve(router).await;

        let backend = HuggingFaceBackend::new(&cfg(&base, Some("secret"))).unwrap();
        let payload = build("Tea $2", ModelProfile::Mixtral, "test/model");
        assert_eq!(
            backend.infer(&payload).await.unwrap(),
            "```json\n{\"items\": []}\n```"
        );
    }

    #[test]
    fn elapsed_millis_saturates() {
        assert_eq!(elapsed_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(elapsed_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn slow_backend_times_out_as_backend_error() {
        let router = Router::new().route(
            "/test/model",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Json(json!([{"generated_text": "too late"}]))
            }),
        );
        let base = serve(router).await;

        let mut config = cfg(&base, Some("secret"));
        config.inference_timeout = Duration::from_secs(1);
        let backend = HuggingFaceBackend::new(&config).unwrap();
        let payload = build("Tea $2", ModelProfile::Mixtral, "test/model");
        match backend.infer(&payload).await {
            Err(AppError::Backend(message)) => {
                assert!(message.contains("timed out after 1s"), "{message}")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_status_is_backend_error() {
        let router = Router::new().route(
            "/test/model",
            post(|| async {
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"error": "Rate limit reached"})),
                )
            }),
        );
        let base = serve(router).await;

        let backend = HuggingFaceBackend::new(&cfg(&base, Some("secret"))).unwrap();
        let payload = build("Tea $2", ModelProfile::Mixtral, "test/model");
        match backend.infer(&payload).await {
            Err(AppError::Backend(message)) => assert_eq!(message, "HTTP 429: Rate limit reached"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
