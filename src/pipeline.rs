//! OCR text to menu items: prompt, inference, normalization, validation.

use std::sync::Arc;

use tracing::debug;

use crate::backend::CompletionBackend;
use crate::error::AppError;
use crate::normalize::normalize;
use crate::prompt::{self, ModelProfile};
use crate::script::ScriptRanges;
use crate::validate::{validate, MenuItem};

/// The linear recovery pipeline for one request.
pub struct MenuPipeline {
    backend: Arc<dyn CompletionBackend>,
    profile: ModelProfile,
    model_id: String,
    script: ScriptRanges,
}

impl MenuPipeline {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        profile: ModelProfile,
        model_id: impl Into<String>,
        script: ScriptRanges,
    ) -> Self {
        Self {
            backend,
            profile,
            model_id: model_id.into(),
            script,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Runs the whole pipeline over OCR output.
    pub async fn parse_menu(&self, source_text: &str) -> Result<Vec<MenuItem>, AppError> {
        let payload = prompt::build(source_text, self.profile, &self.model_id);
        debug!(
            profile = self.profile.as_str(),
            prompt_chars = payload.inputs.chars().count(),
            "built prompt"
        );

        let completion = self.backend.infer(&payload).await?;
        self.recover(&completion)
    }

    /// Free-text English to Chinese translation through the same backend.
    pub async fn translate(&self, text: &str) -> Result<String, AppError> {
        let payload = prompt::build_translation(text, self.profile, &self.model_id);
        let completion = self.backend.infer(&payload).await?;
        let translated = completion.trim();
        if translated.is_empty() {
            return Err(AppError::EmptyResult);
        }
        debug!(chars = translated.chars().count(), "translated text");
        Ok(translated.to_string())
    }

    /// Sends a minimal prompt to confirm the backend answers.
    pub async fn check_backend(&self) -> Result<(), AppError> {
        let payload = prompt::build_liveness(self.profile, &self.model_id);
        self.backend.infer(&payload).await.map(|_| ())
    }

    /// Turns a raw completion into validated items.
    pub fn recover(&self, completion: &str) -> Result<Vec<MenuItem>, AppError> {
        let candidate = normalize(completion, &self.script)?;
        debug!(candidate_chars = candidate.chars().count(), "normalized completion");
        let items = validate(&candidate, &self.script)?;
        for item in &items {
            debug!(
                name = item.name(),
                translated = item.translated_name(),
                price = item.price().unwrap_or("-"),
                "recovered menu item"
            );
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::prompt::PromptPayload;

    struct CannedBackend(Result<&'static str, &'static str>);

    #[async_trait]
    impl CompletionBackend for CannedBackend {
        async fn infer(&self, _payload: &PromptPayload) -> Result<String, AppError> {
            self.0
                .map(ToOwned::to_owned)
                .map_err(AppError::backend)
        }
    }

    fn pipeline(reply: Result<&'static str, &'static str>) -> MenuPipeline {
        MenuPipeline::new(
            Arc::new(CannedBackend(reply)),
            ModelProfile::Mixtral,
            "test/model",
            ScriptRanges::default(),
        )
    }

    #[tokio::test]
    async fn fenced_completion_yields_one_item() {
        let raw = "Here is the JSON:\n```json\n{\"items\":[{\"name\":\"Kung Pao Chicken\",\"nameZh\":\"宫保鸡丁\",\"price\":\"$12.99\"}]}\n```";
        let items = pipeline(Ok(raw)).parse_menu("KUNG PAO CHICKEN 12.99").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name(), "Kung Pao Chicken");
        assert_eq!(items[0].translated_name(), "宫保鸡丁");
        assert_eq!(items[0].price(), Some("$12.99"));
    }

    #[tokio::test]
    async fn completion_without_braces_is_unparsable() {
        let err = pipeline(Ok("I could not find any menu items."))
            .parse_menu("???")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnparsableResponse(_)));
    }

    #[tokio::test]
    async fn contaminated_translation_is_cleaned_and_kept() {
        let raw = r#"{"items": [{"name": "Kung Pao Chicken", "nameZh": "宫保jichicken丁"}]}"#;
        let items = pipeline(Ok(raw)).parse_menu("Kung Pao").await.unwrap();
        assert_eq!(items[0].translated_name(), "宫保丁");
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let err = pipeline(Err("HTTP 500: boom"))
            .parse_menu("Tea")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[tokio::test]
    async fn translate_trims_completion_and_rejects_blank() {
        let translated = pipeline(Ok("  宫保鸡丁\n")).translate("Kung Pao").await.unwrap();
        assert_eq!(translated, "宫保鸡丁");

        let err = pipeline(Ok(" \n ")).translate("Kung Pao").await.unwrap_err();
        assert!(matches!(err, AppError::EmptyResult));
    }

    #[tokio::test]
    async fn check_backend_reports_backend_errors() {
        assert!(pipeline(Ok("hi")).check_backend().await.is_ok());
        let err = pipeline(Err("HTTP 401: bad token"))
            .check_backend()
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[test]
    fn ellipsis_and_dash_reach_translated_name() {
        let raw = r#"{"items": [{"name": "Mapo Tofu", "nameZh": "麻婆豆腐…辣—香"}]}"#;
        let items = pipeline(Ok("")).recover(raw).unwrap();
        assert_eq!(items[0].translated_name(), "麻婆豆腐…辣—香");
    }

    #[test]
    fn recover_reports_malformed_json_after_span_found() {
        let err = pipeline(Ok("")).recover("{\"items\": [oops]}").unwrap_err();
        assert!(matches!(err, AppError::MalformedJson(_)));
    }
}
