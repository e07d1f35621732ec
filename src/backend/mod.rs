//! Backend abstraction for hosted text-generation engines.
//!
//! The pipeline depends on the [`CompletionBackend`] trait instead of a
//! concrete client. A backend knows how to send a prompt and hand back the
//! completion text; it knows nothing about JSON or menus.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::prompt::PromptPayload;

pub mod hugging_face;

/// Backend contract implemented by text-generation services.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Runs one inference call and returns the raw completion, unmodified.
    async fn infer(&self, payload: &PromptPayload) -> Result<String, AppError>;
}

/// Builds the configured backend implementation.
pub fn build_backend(cfg: &AppConfig) -> Result<Arc<dyn CompletionBackend>, AppError> {
    Ok(Arc::new(hugging_face::HuggingFaceBackend::new(cfg)?))
}
